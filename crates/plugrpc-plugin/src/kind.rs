//! The closed set of interfaces that can cross the plugin boundary.

use std::fmt;
use std::sync::Arc;

use plugrpc_rpc::Service;

use crate::client::PluginClient;
use crate::interfaces::{
    Artifact, ArtifactProxy, ArtifactService, Build, BuildProxy, BuildService, Builder,
    BuilderProxy, BuilderService, Communicator, CommunicatorProxy, CommunicatorService,
    Datasource, DatasourceProxy, DatasourceService, Hook, HookProxy, HookService, PostProcessor,
    PostProcessorProxy, PostProcessorService, Provisioner, ProvisionerProxy, ProvisionerService,
    ServeContext, Ui, UiProxy, UiService,
};

/// Interface tag. Each kind is served under a fixed endpoint name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterfaceKind {
    Builder,
    Provisioner,
    PostProcessor,
    Datasource,
    Artifact,
    Build,
    Communicator,
    Hook,
    Ui,
}

impl InterfaceKind {
    pub const ALL: [InterfaceKind; 9] = [
        Self::Builder,
        Self::Provisioner,
        Self::PostProcessor,
        Self::Datasource,
        Self::Artifact,
        Self::Build,
        Self::Communicator,
        Self::Hook,
        Self::Ui,
    ];

    /// RPC endpoint name, the part before the dot in `"Endpoint.Method"`.
    pub fn endpoint_name(self) -> &'static str {
        match self {
            Self::Builder => "Builder",
            Self::Provisioner => "Provisioner",
            Self::PostProcessor => "PostProcessor",
            Self::Datasource => "Datasource",
            Self::Artifact => "Artifact",
            Self::Build => "Build",
            Self::Communicator => "Communicator",
            Self::Hook => "Hook",
            Self::Ui => "Ui",
        }
    }

    pub fn from_endpoint_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.endpoint_name() == name)
    }
}

impl fmt::Display for InterfaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.endpoint_name())
    }
}

/// A local implementation, ready to be served.
#[derive(Clone)]
pub enum LocalObject {
    Builder(Arc<dyn Builder>),
    Provisioner(Arc<dyn Provisioner>),
    PostProcessor(Arc<dyn PostProcessor>),
    Datasource(Arc<dyn Datasource>),
    Artifact(Arc<dyn Artifact>),
    Build(Arc<dyn Build>),
    Communicator(Arc<dyn Communicator>),
    Hook(Arc<dyn Hook>),
    Ui(Arc<dyn Ui>),
}

impl LocalObject {
    pub fn kind(&self) -> InterfaceKind {
        match self {
            Self::Builder(_) => InterfaceKind::Builder,
            Self::Provisioner(_) => InterfaceKind::Provisioner,
            Self::PostProcessor(_) => InterfaceKind::PostProcessor,
            Self::Datasource(_) => InterfaceKind::Datasource,
            Self::Artifact(_) => InterfaceKind::Artifact,
            Self::Build(_) => InterfaceKind::Build,
            Self::Communicator(_) => InterfaceKind::Communicator,
            Self::Hook(_) => InterfaceKind::Hook,
            Self::Ui(_) => InterfaceKind::Ui,
        }
    }

    /// The endpoint registration for this object. `ctx` is used to reach
    /// objects that arrive as arguments.
    pub(crate) fn into_service(self, ctx: ServeContext) -> Arc<dyn Service> {
        match self {
            Self::Builder(inner) => Arc::new(BuilderService::new(inner, ctx)),
            Self::Provisioner(inner) => Arc::new(ProvisionerService::new(inner, ctx)),
            Self::PostProcessor(inner) => Arc::new(PostProcessorService::new(inner, ctx)),
            Self::Datasource(inner) => Arc::new(DatasourceService::new(inner)),
            Self::Artifact(inner) => Arc::new(ArtifactService::new(inner)),
            Self::Build(inner) => Arc::new(BuildService::new(inner, ctx)),
            Self::Communicator(inner) => Arc::new(CommunicatorService::new(inner, ctx)),
            Self::Hook(inner) => Arc::new(HookService::new(inner, ctx)),
            Self::Ui(inner) => Arc::new(UiService::new(inner)),
        }
    }
}

impl fmt::Debug for LocalObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LocalObject").field(&self.kind()).finish()
    }
}

/// A proxy for an object served by the peer.
#[derive(Clone)]
pub enum RemoteObject {
    Builder(Arc<BuilderProxy>),
    Provisioner(Arc<ProvisionerProxy>),
    PostProcessor(Arc<PostProcessorProxy>),
    Datasource(Arc<DatasourceProxy>),
    Artifact(Arc<ArtifactProxy>),
    Build(Arc<BuildProxy>),
    Communicator(Arc<CommunicatorProxy>),
    Hook(Arc<HookProxy>),
    Ui(Arc<UiProxy>),
}

impl RemoteObject {
    /// Wrap `client` in the proxy for `kind`.
    pub fn connect(kind: InterfaceKind, client: PluginClient) -> Self {
        match kind {
            InterfaceKind::Builder => Self::Builder(Arc::new(BuilderProxy::new(client))),
            InterfaceKind::Provisioner => Self::Provisioner(Arc::new(ProvisionerProxy::new(client))),
            InterfaceKind::PostProcessor => {
                Self::PostProcessor(Arc::new(PostProcessorProxy::new(client)))
            }
            InterfaceKind::Datasource => Self::Datasource(Arc::new(DatasourceProxy::new(client))),
            InterfaceKind::Artifact => Self::Artifact(Arc::new(ArtifactProxy::new(client))),
            InterfaceKind::Build => Self::Build(Arc::new(BuildProxy::new(client))),
            InterfaceKind::Communicator => {
                Self::Communicator(Arc::new(CommunicatorProxy::new(client)))
            }
            InterfaceKind::Hook => Self::Hook(Arc::new(HookProxy::new(client))),
            InterfaceKind::Ui => Self::Ui(Arc::new(UiProxy::new(client))),
        }
    }

    pub fn kind(&self) -> InterfaceKind {
        match self {
            Self::Builder(_) => InterfaceKind::Builder,
            Self::Provisioner(_) => InterfaceKind::Provisioner,
            Self::PostProcessor(_) => InterfaceKind::PostProcessor,
            Self::Datasource(_) => InterfaceKind::Datasource,
            Self::Artifact(_) => InterfaceKind::Artifact,
            Self::Build(_) => InterfaceKind::Build,
            Self::Communicator(_) => InterfaceKind::Communicator,
            Self::Hook(_) => InterfaceKind::Hook,
            Self::Ui(_) => InterfaceKind::Ui,
        }
    }

    /// Use the proxy as the local trait object it stands in for.
    pub fn into_local(self) -> LocalObject {
        match self {
            Self::Builder(p) => LocalObject::Builder(p),
            Self::Provisioner(p) => LocalObject::Provisioner(p),
            Self::PostProcessor(p) => LocalObject::PostProcessor(p),
            Self::Datasource(p) => LocalObject::Datasource(p),
            Self::Artifact(p) => LocalObject::Artifact(p),
            Self::Build(p) => LocalObject::Build(p),
            Self::Communicator(p) => LocalObject::Communicator(p),
            Self::Hook(p) => LocalObject::Hook(p),
            Self::Ui(p) => LocalObject::Ui(p),
        }
    }
}

impl fmt::Debug for RemoteObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RemoteObject").field(&self.kind()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_names_are_unique_and_reversible() {
        let mut names: Vec<&str> = InterfaceKind::ALL.iter().map(|k| k.endpoint_name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), InterfaceKind::ALL.len());

        for kind in InterfaceKind::ALL {
            assert_eq!(InterfaceKind::from_endpoint_name(kind.endpoint_name()), Some(kind));
        }
        assert_eq!(InterfaceKind::from_endpoint_name("Nope"), None);
        assert_eq!(InterfaceKind::PostProcessor.to_string(), "PostProcessor");
    }
}
