//! Protobuf messages for every artifact ledsync persists between runs.
//!
//! The messages are declared with `prost` derive attributes directly, so the
//! crate needs no `protoc` at build time. Tags are part of the on-disk format
//! and must never be reused.

pub mod proto {
    /// LED region of interest in original-frame pixel coordinates.
    /// `(x0, y0)` is inclusive, `(x1, y1)` exclusive.
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct LedRegion {
        #[prost(string, tag = "1")]
        pub source_file: ::prost::alloc::string::String,
        #[prost(uint32, tag = "2")]
        pub x0: u32,
        #[prost(uint32, tag = "3")]
        pub y0: u32,
        #[prost(uint32, tag = "4")]
        pub x1: u32,
        #[prost(uint32, tag = "5")]
        pub y1: u32,
    }

    /// Binary LED mask over the decimated crop, row-major.
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct LedMask {
        #[prost(string, tag = "1")]
        pub source_file: ::prost::alloc::string::String,
        #[prost(uint32, tag = "2")]
        pub width: u32,
        #[prost(uint32, tag = "3")]
        pub height: u32,
        /// Spatial decimation the mask was built with.
        #[prost(uint32, tag = "4")]
        pub decimation: u32,
        #[prost(bool, repeated, tag = "5")]
        pub pixels: ::prost::alloc::vec::Vec<bool>,
        /// Std threshold used when the mask was derived.
        #[prost(double, tag = "6")]
        pub std_threshold: f64,
    }

    /// Per-frame LED brightness trace in playback order.
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct LedSignal {
        #[prost(string, tag = "1")]
        pub source_file: ::prost::alloc::string::String,
        #[prost(double, repeated, tag = "2")]
        pub samples: ::prost::alloc::vec::Vec<f64>,
        #[prost(uint32, tag = "3")]
        pub decimation: u32,
        /// Set when reading stopped before the end of the video.
        #[prost(string, optional, tag = "4")]
        pub read_error: ::core::option::Option<::prost::alloc::string::String>,
    }

    /// Outcome of converting one depth-camera capture to mp4.
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct CaptureSummary {
        #[prost(string, tag = "1")]
        pub source_file: ::prost::alloc::string::String,
        #[prost(string, optional, tag = "2")]
        pub failure: ::core::option::Option<::prost::alloc::string::String>,
        #[prost(double, tag = "3")]
        pub duration_seconds: f64,
        #[prost(uint64, tag = "4")]
        pub corrected_frame_count: u64,
        #[prost(uint64, tag = "5")]
        pub captured_frame_count: u64,
        #[prost(uint64, tag = "6")]
        pub repeated_frame_count: u64,
    }
}
