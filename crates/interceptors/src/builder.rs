use std::sync::Arc;

use kmon_core::{
    Metrics,
    config::KstreamConfig,
    fs::DevMapper,
    handle::{HandleSnapshotter, ObjectTypes},
    ps::ProcessSnapshotter,
    scanner::{ScanError, Scanner},
};
use thiserror::Error;

use crate::{
    Interceptor, InterceptorChain, fs::FsInterceptor, handle::HandleInterceptor,
    image::ImageInterceptor, net::NetInterceptor, ps::PsInterceptor,
    registry::RegistryInterceptor,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("{interceptor} interceptor requires the {collaborator}")]
    MissingCollaborator {
        interceptor: &'static str,
        collaborator: &'static str,
    },
}

/// Shared state the interceptors are wired to. Owned outside the chain.
#[derive(Clone)]
pub struct Collaborators {
    pub psnap: Arc<dyn ProcessSnapshotter>,
    pub hsnap: Option<Arc<dyn HandleSnapshotter>>,
    pub devmapper: Arc<dyn DevMapper>,
    pub object_types: Option<Arc<dyn ObjectTypes>>,
    pub metrics: Arc<Metrics>,
}

type ScannerInit<'a> = Box<dyn FnOnce() -> Result<Arc<dyn Scanner>, ScanError> + 'a>;

/// Assembles the interceptor chain for the enabled kernel event categories.
///
/// Interceptors are always laid out as process, file system, registry, image,
/// network, handle. The process interceptor is mandatory.
pub struct ChainBuilder<'a> {
    config: &'a KstreamConfig,
    collaborators: Collaborators,
    scanner: Option<ScannerInit<'a>>,
}

impl<'a> ChainBuilder<'a> {
    pub fn new(config: &'a KstreamConfig, collaborators: Collaborators) -> Self {
        Self {
            config,
            collaborators,
            scanner: None,
        }
    }

    /// Sets the scan engine initializer. If it fails the chain is built
    /// without scanning.
    pub fn with_scanner<F>(mut self, init: F) -> Self
    where
        F: FnOnce() -> Result<Arc<dyn Scanner>, ScanError> + 'a,
    {
        self.scanner = Some(Box::new(init));
        self
    }

    pub fn build(self) -> Result<InterceptorChain, BuildError> {
        let Collaborators {
            psnap,
            hsnap,
            devmapper,
            object_types,
            metrics,
        } = self.collaborators;
        let config = self.config;

        let require_hsnap = |interceptor| {
            hsnap.clone().ok_or(BuildError::MissingCollaborator {
                interceptor,
                collaborator: "handle snapshotter",
            })
        };
        let registry_hsnap = config
            .enable_registry
            .then(|| require_hsnap("registry"))
            .transpose()?;
        let handle_deps = if config.enable_handle {
            let object_types = object_types.ok_or(BuildError::MissingCollaborator {
                interceptor: "handle",
                collaborator: "object type table",
            })?;
            Some((require_hsnap("handle")?, object_types))
        } else {
            None
        };

        let scanner = match self.scanner.map(|init| init()) {
            Some(Ok(scanner)) => Some(scanner),
            Some(Err(err)) => {
                log::warn!("unable to start the scanner: {err}");
                None
            }
            None => None,
        };

        let mut interceptors = vec![Interceptor::Process(PsInterceptor::new(
            psnap.clone(),
            scanner.clone(),
        ))];
        if config.enable_fileio {
            interceptors.push(Interceptor::FileSystem(FsInterceptor::new(
                devmapper.clone(),
                hsnap.clone(),
            )));
        }
        if let Some(hsnap) = registry_hsnap {
            interceptors.push(Interceptor::Registry(RegistryInterceptor::new(hsnap)));
        }
        if config.enable_image {
            interceptors.push(Interceptor::Image(ImageInterceptor::new(
                psnap,
                devmapper.clone(),
                scanner,
            )));
        }
        if config.enable_net {
            interceptors.push(Interceptor::Network(NetInterceptor::new()));
        }
        if let Some((hsnap, object_types)) = handle_deps {
            interceptors.push(Interceptor::Handle(HandleInterceptor::new(
                hsnap,
                object_types,
                devmapper,
            )));
        }

        let chain = InterceptorChain::new(interceptors, metrics);
        log::debug!("interceptor chain: {}", chain.names().join(" -> "));
        Ok(chain)
    }
}
