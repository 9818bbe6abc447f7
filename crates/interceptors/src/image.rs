use std::{path::Path, sync::Arc};

use kmon_core::{
    Kevent, KparamsError,
    fs::DevMapper,
    kparams,
    ktypes::{ENUM_IMAGE, LOAD_IMAGE, UNLOAD_IMAGE},
    ps::{Module, ProcessSnapshotter, TrackerUpdate},
    scanner::Scanner,
};

use crate::{Intercept, InterceptError, Intercepted, fail, proceed, ps::optional};

/// Keeps the modules of the process snapshotter up to date and scans the
/// freshly loaded images.
pub struct ImageInterceptor {
    psnap: Arc<dyn ProcessSnapshotter>,
    devmapper: Arc<dyn DevMapper>,
    scanner: Option<Arc<dyn Scanner>>,
}

impl ImageInterceptor {
    pub fn new(
        psnap: Arc<dyn ProcessSnapshotter>,
        devmapper: Arc<dyn DevMapper>,
        scanner: Option<Arc<dyn Scanner>>,
    ) -> Self {
        Self {
            psnap,
            devmapper,
            scanner,
        }
    }

    fn module(&self, kevt: &Kevent) -> Result<(u32, Module), KparamsError> {
        let kpars = &kevt.kparams;
        let pid = optional(kpars.get_u32(kparams::PID))?.unwrap_or(kevt.pid);
        let module = Module {
            base: kpars.get_u64(kparams::IMAGE_BASE)?,
            size: optional(kpars.get_u64(kparams::IMAGE_SIZE))?.unwrap_or_default(),
            name: self.devmapper.resolve(kpars.get_str(kparams::FILE_NAME)?),
        };
        Ok((pid, module))
    }

    fn scan(&self, kevt: &mut Kevent, image: &str) -> Result<(), InterceptError> {
        let Some(scanner) = &self.scanner else {
            return Ok(());
        };
        let matches = scanner
            .scan_file(Path::new(image))
            .map_err(|error| InterceptError::Scan {
                target: image.to_string(),
                error,
            })?;
        if !matches.is_empty() {
            log::warn!("image {image} matched {} scan rules", matches.len());
            let rules = matches.into_iter().map(|m| m.rule).collect::<Vec<_>>();
            kevt.kparams.insert(kparams::YARA_MATCHES, rules);
        }
        Ok(())
    }
}

impl Intercept for ImageInterceptor {
    fn name(&self) -> &'static str {
        "image"
    }

    fn intercept(&self, kevt: &mut Kevent) -> Intercepted {
        let ktype = kevt.ktype();
        if !matches!(ktype, LOAD_IMAGE | ENUM_IMAGE | UNLOAD_IMAGE) {
            return proceed();
        }
        let (pid, module) = match self.module(kevt) {
            Ok(module) => module,
            Err(err) => return fail(err),
        };
        kevt.kparams.insert(kparams::FILE_NAME, module.name.clone());

        if ktype == UNLOAD_IMAGE {
            self.psnap.observe(TrackerUpdate::UnloadModule {
                pid,
                base: module.base,
            });
            return proceed();
        }
        let image = module.name.clone();
        self.psnap.observe(TrackerUpdate::LoadModule { pid, module });
        if ktype == LOAD_IMAGE {
            if let Err(err) = self.scan(kevt, &image) {
                return fail(err);
            }
        }
        proceed()
    }
}

#[cfg(test)]
mod tests {
    use kmon_core::{
        fs::DriveMapper,
        ps::{ProcessInfo, ProcessTracker},
        scanner::{ScanError, ScanMatch},
    };

    use super::*;
    use crate::Next;

    /// Flags every scanned image.
    struct FlagAll;

    impl Scanner for FlagAll {
        fn scan_file(&self, _path: &Path) -> Result<Vec<ScanMatch>, ScanError> {
            Ok(vec![ScanMatch {
                rule: "suspicious_module".to_string(),
                tags: Vec::new(),
            }])
        }
    }

    fn interceptor(scanner: Option<Arc<dyn Scanner>>) -> (ImageInterceptor, Arc<ProcessTracker>) {
        let psnap = Arc::new(ProcessTracker::new());
        psnap.observe(TrackerUpdate::Create(ProcessInfo {
            pid: 4321,
            name: "svchost.exe".to_string(),
            ..Default::default()
        }));
        let devmapper = Arc::new(DriveMapper::new([("\\Device\\HarddiskVolume2", "C:")]));
        (
            ImageInterceptor::new(psnap.clone(), devmapper, scanner),
            psnap,
        )
    }

    fn image(ktype: kmon_core::Ktype) -> Kevent {
        Kevent::new(1, 4321, 4400, ktype)
            .with_param(kparams::PID, 4321u32)
            .with_param(kparams::IMAGE_BASE, 0x7ff8_1c2a_0000u64)
            .with_param(kparams::IMAGE_SIZE, 0x1f_0000u64)
            .with_param(
                kparams::FILE_NAME,
                "\\Device\\HarddiskVolume2\\Windows\\System32\\ntdll.dll",
            )
    }

    #[test]
    fn load_and_unload() {
        let (interceptor, psnap) = interceptor(None);
        let mut kevt = image(LOAD_IMAGE);
        let (next, res) = interceptor.intercept(&mut kevt);
        assert_eq!(next, Next::Continue);
        assert!(res.is_ok());
        assert_eq!(
            kevt.kparams.get_str(kparams::FILE_NAME),
            Ok("C:\\Windows\\System32\\ntdll.dll")
        );
        let modules = psnap.lookup(4321).unwrap().modules;
        assert_eq!(modules.len(), 1);
        assert_eq!(modules[0].name, "C:\\Windows\\System32\\ntdll.dll");

        interceptor.intercept(&mut image(UNLOAD_IMAGE)).1.unwrap();
        assert!(psnap.lookup(4321).unwrap().modules.is_empty());
    }

    #[test]
    fn only_loaded_images_are_scanned() {
        let (interceptor, _) = interceptor(Some(Arc::new(FlagAll)));

        let mut kevt = image(ENUM_IMAGE);
        interceptor.intercept(&mut kevt).1.unwrap();
        assert!(!kevt.kparams.contains(kparams::YARA_MATCHES));

        let mut kevt = image(LOAD_IMAGE);
        interceptor.intercept(&mut kevt).1.unwrap();
        assert_eq!(
            kevt.kparams.get_list(kparams::YARA_MATCHES),
            Ok(&["suspicious_module".to_string()][..])
        );
    }

    #[test]
    fn scan_failures_are_reported() {
        struct Broken;
        impl Scanner for Broken {
            fn scan_file(&self, _path: &Path) -> Result<Vec<ScanMatch>, ScanError> {
                Err(ScanError::Disabled)
            }
        }
        let (interceptor, psnap) = interceptor(Some(Arc::new(Broken)));
        let mut kevt = image(LOAD_IMAGE);
        let (next, res) = interceptor.intercept(&mut kevt);
        assert_eq!(next, Next::Continue);
        assert!(matches!(res, Err(InterceptError::Scan { .. })));
        assert_eq!(psnap.lookup(4321).unwrap().modules.len(), 1);
    }

    #[test]
    fn other_events_are_ignored() {
        let (interceptor, _) = interceptor(None);
        let mut kevt = Kevent::new(1, 4321, 4400, kmon_core::ktypes::CREATE_FILE);
        assert!(interceptor.intercept(&mut kevt).1.is_ok());
        assert!(kevt.kparams.is_empty());
    }
}
