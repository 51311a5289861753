//! Generated protobuf and gRPC code for Marquee.

pub mod marquee {
    pub mod health {
        pub mod v1 {
            tonic::include_proto!("marquee.health.v1");
        }
    }
}
