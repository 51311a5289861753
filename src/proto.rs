//! Re-exported protobuf code.

pub use marquee_proto::marquee;
