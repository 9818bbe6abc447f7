use std::sync::Arc;

use kmon_core::{
    Kevent, KparamsError,
    fs::DevMapper,
    handle::{Handle, HandleSnapshotter, HandleUpdate, ObjectTypes},
    kparams,
    ktypes::{CLOSE_HANDLE, CREATE_HANDLE},
};

use crate::{Intercept, InterceptError, Intercepted, fail, proceed, ps::optional};

const FILE_OBJECT_TYPE: &str = "File";

/// Resolves handle object types and names, and feeds the handle snapshotter.
pub struct HandleInterceptor {
    hsnap: Arc<dyn HandleSnapshotter>,
    object_types: Arc<dyn ObjectTypes>,
    devmapper: Arc<dyn DevMapper>,
}

impl HandleInterceptor {
    pub fn new(
        hsnap: Arc<dyn HandleSnapshotter>,
        object_types: Arc<dyn ObjectTypes>,
        devmapper: Arc<dyn DevMapper>,
    ) -> Self {
        Self {
            hsnap,
            object_types,
            devmapper,
        }
    }

    fn handle(&self, kevt: &Kevent) -> Result<(Handle, u16), KparamsError> {
        let kpars = &kevt.kparams;
        let type_id = kpars.get_u16(kparams::TYPE_ID)?;
        let handle = Handle {
            pid: optional(kpars.get_u32(kparams::PID))?.unwrap_or(kevt.pid),
            id: kpars.get_u64(kparams::HANDLE_ID)?,
            object: optional(kpars.get_u64(kparams::HANDLE_OBJECT))?.unwrap_or_default(),
            type_name: String::new(),
            name: optional(kpars.get_string(kparams::HANDLE_NAME))?.unwrap_or_default(),
        };
        Ok((handle, type_id))
    }
}

impl Intercept for HandleInterceptor {
    fn name(&self) -> &'static str {
        "handle"
    }

    fn intercept(&self, kevt: &mut Kevent) -> Intercepted {
        let ktype = kevt.ktype();
        if ktype != CREATE_HANDLE && ktype != CLOSE_HANDLE {
            return proceed();
        }
        let (mut handle, type_id) = match self.handle(kevt) {
            Ok(handle) => handle,
            Err(err) => return fail(err),
        };
        let type_name = self.object_types.name_of(type_id);
        if let Some(type_name) = &type_name {
            handle.type_name = type_name.clone();
            if type_name == FILE_OBJECT_TYPE && !handle.name.is_empty() {
                handle.name = self.devmapper.resolve(&handle.name);
            }
        }

        if ktype == CREATE_HANDLE {
            self.hsnap.observe(HandleUpdate::Create(handle.clone()));
        } else {
            let closed = self.hsnap.observe(HandleUpdate::Close {
                pid: handle.pid,
                id: handle.id,
            });
            if let Some(closed) = closed.filter(|_| handle.name.is_empty()) {
                handle.name = closed.name;
            }
        }

        kevt.kparams.insert(kparams::HANDLE_NAME, handle.name);
        match type_name {
            Some(type_name) => {
                kevt.kparams.insert(kparams::TYPE_NAME, type_name);
                proceed()
            }
            None => fail(InterceptError::UnknownObjectType(type_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use kmon_core::{
        fs::DriveMapper,
        handle::{HandleTable, ObjectTypeStore},
    };

    use super::*;
    use crate::Next;

    fn interceptor() -> (HandleInterceptor, Arc<HandleTable>) {
        let hsnap = Arc::new(HandleTable::new());
        let devmapper = DriveMapper::new([("\\Device\\HarddiskVolume2", "C:")]);
        (
            HandleInterceptor::new(
                hsnap.clone(),
                Arc::new(ObjectTypeStore::default()),
                Arc::new(devmapper),
            ),
            hsnap,
        )
    }

    fn handle_kevent(ktype: kmon_core::Ktype, type_id: u16, name: &str) -> Kevent {
        Kevent::new(1, 4321, 4400, ktype)
            .with_param(kparams::HANDLE_ID, 0x1f4u64)
            .with_param(kparams::HANDLE_OBJECT, 0xffff_b10c_0d03_4080u64)
            .with_param(kparams::TYPE_ID, type_id)
            .with_param(kparams::HANDLE_NAME, name)
    }

    #[test]
    fn create_file_handle() {
        let (interceptor, hsnap) = interceptor();
        let mut kevt = handle_kevent(
            CREATE_HANDLE,
            37,
            "\\Device\\HarddiskVolume2\\Windows\\win.ini",
        );

        let (next, res) = interceptor.intercept(&mut kevt);
        assert_eq!(next, Next::Continue);
        assert!(res.is_ok());
        assert_eq!(kevt.kparams.get_str(kparams::TYPE_NAME), Ok("File"));
        assert_eq!(
            kevt.kparams.get_str(kparams::HANDLE_NAME),
            Ok("C:\\Windows\\win.ini")
        );
        let handle = hsnap.lookup(4321, 0x1f4).unwrap();
        assert_eq!(handle.name, "C:\\Windows\\win.ini");
        assert_eq!(handle.type_name, "File");
    }

    #[test]
    fn close_handle_inherits_the_name() {
        let (interceptor, hsnap) = interceptor();
        interceptor
            .intercept(&mut handle_kevent(
                CREATE_HANDLE,
                44,
                "\\REGISTRY\\MACHINE\\SYSTEM",
            ))
            .1
            .unwrap();

        let mut kevt = handle_kevent(CLOSE_HANDLE, 44, "");
        interceptor.intercept(&mut kevt).1.unwrap();
        assert_eq!(
            kevt.kparams.get_str(kparams::HANDLE_NAME),
            Ok("\\REGISTRY\\MACHINE\\SYSTEM")
        );
        assert_eq!(kevt.kparams.get_str(kparams::TYPE_NAME), Ok("Key"));
        assert!(hsnap.is_empty());
    }

    #[test]
    fn unknown_object_type() {
        let (interceptor, hsnap) = interceptor();
        let mut kevt = handle_kevent(CREATE_HANDLE, 999, "whatever");
        let (next, res) = interceptor.intercept(&mut kevt);
        assert_eq!(next, Next::Continue);
        assert!(matches!(res, Err(InterceptError::UnknownObjectType(999))));
        assert_eq!(hsnap.len(), 1);
        assert!(!kevt.kparams.contains(kparams::TYPE_NAME));
    }

    #[test]
    fn missing_handle_id() {
        let (interceptor, _) = interceptor();
        let mut kevt = Kevent::new(1, 4321, 4400, CREATE_HANDLE).with_param(kparams::TYPE_ID, 7u16);
        assert!(interceptor.intercept(&mut kevt).1.is_err());
    }
}
