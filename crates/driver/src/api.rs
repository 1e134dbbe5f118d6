//! Generated gRPC bindings for the local protocols this driver speaks.

/// Kubelet DRA node plugin protocol.
pub mod dra {
    pub mod v1beta1 {
        tonic::include_proto!("dra.v1beta1");
    }
}

/// Kubelet plugin registration handshake.
pub mod registration {
    tonic::include_proto!("pluginregistration");
}

/// OCI createRuntime hook callback.
pub mod ocihook {
    pub mod v1alpha1 {
        tonic::include_proto!("ocihook.v1alpha1");
    }
}

/// CRI runtime service subset (sandbox status, sandbox events).
pub mod cri {
    tonic::include_proto!("runtime.v1");
}
