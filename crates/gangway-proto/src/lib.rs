pub mod router {
    #[allow(clippy::large_enum_variant)]
    pub mod v1 {
        tonic::include_proto!("gangway.router.v1");
    }
}
