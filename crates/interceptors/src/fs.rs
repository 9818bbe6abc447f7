use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use kmon_core::{
    Kevent,
    fs::DevMapper,
    handle::HandleSnapshotter,
    kparams,
    ktypes::{CLOSE_FILE, CREATE_FILE, Category, FILE_OP_END, FILE_RUNDOWN, RELEASE_FILE},
};

use crate::{Intercept, Intercepted, cancel, fail, proceed, ps::optional, stop};

/// Returns the operation performed by `CreateFile` according to the create
/// disposition stored in the upper byte of the create options.
pub fn create_disposition(file_options: u64) -> &'static str {
    match file_options >> 24 {
        0 => "supersede",
        1 => "open",
        2 => "create",
        3 => "openif",
        4 => "overwrite",
        5 => "overwriteif",
        _ => "unknown",
    }
}

/// Resolves file names and keeps track of the open file objects.
pub struct FsInterceptor {
    devmapper: Arc<dyn DevMapper>,
    hsnap: Option<Arc<dyn HandleSnapshotter>>,
    /// file object address -> file name
    files: RwLock<HashMap<u64, String>>,
}

impl FsInterceptor {
    pub fn new(devmapper: Arc<dyn DevMapper>, hsnap: Option<Arc<dyn HandleSnapshotter>>) -> Self {
        Self {
            devmapper,
            hsnap,
            files: RwLock::new(HashMap::new()),
        }
    }

    fn file_name(&self, file_object: u64) -> Option<String> {
        let files = self.files.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(name) = files.get(&file_object) {
            return Some(name.clone());
        }
        drop(files);
        self.hsnap
            .as_ref()
            .and_then(|hsnap| hsnap.lookup_by_object(file_object))
            .map(|handle| self.devmapper.resolve(&handle.name))
            .filter(|name| !name.is_empty())
    }

    fn remember(&self, file_object: u64, name: String) -> Option<String> {
        self.files
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(file_object, name)
    }

    fn forget(&self, file_object: u64) {
        self.files
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&file_object);
    }

    fn rundown(&self, kevt: &mut Kevent) -> Intercepted {
        let file_object = match kevt.kparams.get_u64(kparams::FILE_OBJECT) {
            Ok(file_object) => file_object,
            Err(err) => return fail(err),
        };
        let name = match kevt.kparams.get_str(kparams::FILE_NAME) {
            Ok(name) => self.devmapper.resolve(name),
            Err(err) => return fail(err),
        };
        kevt.kparams.insert(kparams::FILE_NAME, name.clone());
        if self.remember(file_object, name).is_some() {
            return cancel();
        }
        stop()
    }

    fn create_file(&self, kevt: &mut Kevent) -> Intercepted {
        let kpars = &kevt.kparams;
        let (file_object, name, options) = match (
            kpars.get_u64(kparams::FILE_OBJECT),
            kpars.get_str(kparams::FILE_NAME),
            optional(kpars.get_u64(kparams::FILE_OPTIONS)),
        ) {
            (Ok(file_object), Ok(name), Ok(options)) => (file_object, name, options),
            (Err(err), ..) | (_, Err(err), _) | (.., Err(err)) => return fail(err),
        };
        let name = self.devmapper.resolve(name);
        if let Some(options) = options {
            kevt.kparams
                .insert(kparams::OPERATION, create_disposition(options));
        }
        kevt.kparams.insert(kparams::FILE_NAME, name.clone());
        if let Some(ps) = &kevt.ps {
            kevt.kparams.insert(kparams::PROCESS_NAME, ps.name.clone());
        }
        self.remember(file_object, name);
        proceed()
    }
}

impl Intercept for FsInterceptor {
    fn name(&self) -> &'static str {
        "fs"
    }

    fn intercept(&self, kevt: &mut Kevent) -> Intercepted {
        match kevt.ktype() {
            FILE_RUNDOWN => self.rundown(kevt),
            CREATE_FILE => self.create_file(kevt),
            FILE_OP_END => stop(),
            ktype if ktype.category() == Category::File => {
                let file_object = match kevt.kparams.get_u64(kparams::FILE_OBJECT) {
                    Ok(file_object) => file_object,
                    Err(err) => return fail(err),
                };
                let resolved = kevt
                    .kparams
                    .get_str(kparams::FILE_NAME)
                    .is_ok_and(|name| !name.is_empty());
                if !resolved {
                    match self.file_name(file_object) {
                        Some(name) => {
                            kevt.kparams.insert(kparams::FILE_NAME, name);
                        }
                        None => log::trace!("file object {file_object:#x} not found"),
                    }
                }
                if ktype == RELEASE_FILE || ktype == CLOSE_FILE {
                    self.forget(file_object);
                }
                proceed()
            }
            _ => proceed(),
        }
    }
}
