//! Protobuf definitions for the Stampede control-plane gRPC API.

pub mod stampede {
    pub mod backend {
        pub mod v1 {
            tonic::include_proto!("stampede.backend.v1");
        }
    }
}

pub use stampede::backend::v1::*;
