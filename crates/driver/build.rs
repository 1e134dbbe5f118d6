fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Services this driver exposes (kubelet DRA plugin, kubelet registration,
    // OCI hook callback).
    tonic_build::configure()
        .build_client(false)
        .compile_protos(
            &[
                "proto/dra_plugin.proto",
                "proto/plugin_registration.proto",
                "proto/oci_hook.proto",
            ],
            &["proto"],
        )?;

    // CRI runtime service, consumed as a client only.
    tonic_build::configure()
        .build_server(false)
        .compile_protos(&["proto/cri_runtime.proto"], &["proto"])?;

    Ok(())
}
