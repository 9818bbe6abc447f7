use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use kmon_core::{
    Kevent,
    handle::HandleSnapshotter,
    kparams,
    ktypes::{Category, REG_CREATE_KCB, REG_DELETE_KCB, REG_KCB_RUNDOWN},
};

use crate::{Intercept, Intercepted, fail, proceed, ps::optional, stop};

const MACHINE_ROOT: &str = "\\REGISTRY\\MACHINE";
const USER_ROOT: &str = "\\REGISTRY\\USER";
const CLASSES_SUFFIX: &str = "_Classes";

/// Rewrites native registry paths with the well-known root key names.
pub fn normalize_key(key: &str) -> String {
    if let Some(rest) = strip_root(key, MACHINE_ROOT) {
        return format!("HKEY_LOCAL_MACHINE{rest}");
    }
    if let Some(rest) = strip_root(key, USER_ROOT) {
        if let Some(subkey) = rest.strip_prefix('\\') {
            let (hive, tail) = subkey.split_at(subkey.find('\\').unwrap_or(subkey.len()));
            let classes = hive.len() > CLASSES_SUFFIX.len()
                && hive
                    .get(hive.len() - CLASSES_SUFFIX.len()..)
                    .is_some_and(|suffix| suffix.eq_ignore_ascii_case(CLASSES_SUFFIX));
            if classes {
                return format!("HKEY_CURRENT_USER\\Software\\Classes{tail}");
            }
        }
        return format!("HKEY_USERS{rest}");
    }
    key.to_string()
}

/// Strips the root key if the path starts with it, ignoring case.
fn strip_root<'a>(key: &'a str, root: &str) -> Option<&'a str> {
    let head = key.get(..root.len())?;
    if !head.eq_ignore_ascii_case(root) {
        return None;
    }
    let rest = &key[root.len()..];
    (rest.is_empty() || rest.starts_with('\\')).then_some(rest)
}

/// Builds full registry key names out of key control blocks.
pub struct RegistryInterceptor {
    hsnap: Arc<dyn HandleSnapshotter>,
    /// key control block address -> key name
    kcbs: RwLock<HashMap<u64, String>>,
}

impl RegistryInterceptor {
    pub fn new(hsnap: Arc<dyn HandleSnapshotter>) -> Self {
        Self {
            hsnap,
            kcbs: RwLock::new(HashMap::new()),
        }
    }

    fn base_key(&self, key_handle: u64) -> Option<String> {
        let kcbs = self.kcbs.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(name) = kcbs.get(&key_handle) {
            return Some(name.clone());
        }
        drop(kcbs);
        self.hsnap
            .lookup_by_object(key_handle)
            .map(|handle| handle.name)
            .filter(|name| !name.is_empty())
    }

    fn full_key(&self, kevt: &Kevent) -> Result<String, kmon_core::KparamsError> {
        let key_handle = optional(kevt.kparams.get_u64(kparams::KEY_HANDLE))?.unwrap_or(0);
        let key_name = optional(kevt.kparams.get_str(kparams::KEY_NAME))?.unwrap_or_default();
        if key_handle == 0 {
            return Ok(key_name.to_string());
        }
        let Some(base) = self.base_key(key_handle) else {
            log::trace!("key control block {key_handle:#x} not found");
            return Ok(key_name.to_string());
        };
        let key_name = key_name.trim_start_matches('\\');
        if key_name.is_empty() {
            Ok(base)
        } else {
            Ok(format!("{}\\{key_name}", base.trim_end_matches('\\')))
        }
    }
}

impl Intercept for RegistryInterceptor {
    fn name(&self) -> &'static str {
        "registry"
    }

    fn intercept(&self, kevt: &mut Kevent) -> Intercepted {
        match kevt.ktype() {
            REG_CREATE_KCB | REG_KCB_RUNDOWN => {
                let (key_handle, key_name) = match (
                    kevt.kparams.get_u64(kparams::KEY_HANDLE),
                    kevt.kparams.get_str(kparams::KEY_NAME),
                ) {
                    (Ok(key_handle), Ok(key_name)) => (key_handle, key_name.to_string()),
                    (Err(err), _) | (_, Err(err)) => return fail(err),
                };
                self.kcbs
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(key_handle, key_name);
                stop()
            }
            REG_DELETE_KCB => {
                let key_handle = match kevt.kparams.get_u64(kparams::KEY_HANDLE) {
                    Ok(key_handle) => key_handle,
                    Err(err) => return fail(err),
                };
                self.kcbs
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&key_handle);
                proceed()
            }
            ktype if ktype.category() == Category::Registry => {
                match self.full_key(kevt) {
                    Ok(key) => {
                        kevt.kparams.insert(kparams::KEY_NAME, normalize_key(&key));
                    }
                    Err(err) => return fail(err),
                }
                proceed()
            }
            _ => proceed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use kmon_core::{
        handle::{Handle, HandleTable, HandleUpdate},
        ktypes::{REG_OPEN_KEY, REG_SET_VALUE},
    };

    use super::*;
    use crate::Next;

    const KCB: u64 = 0xffff_a08a_39c2_e0d0;

    fn interceptor() -> (RegistryInterceptor, Arc<HandleTable>) {
        let hsnap = Arc::new(HandleTable::new());
        (RegistryInterceptor::new(hsnap.clone()), hsnap)
    }

    #[test]
    fn normalization() {
        assert_eq!(
            normalize_key("\\REGISTRY\\MACHINE\\SYSTEM\\CurrentControlSet"),
            "HKEY_LOCAL_MACHINE\\SYSTEM\\CurrentControlSet"
        );
        assert_eq!(
            normalize_key("\\Registry\\Machine\\SOFTWARE"),
            "HKEY_LOCAL_MACHINE\\SOFTWARE"
        );
        assert_eq!(
            normalize_key("\\REGISTRY\\USER\\S-1-5-21-1000_Classes\\CLSID"),
            "HKEY_CURRENT_USER\\Software\\Classes\\CLSID"
        );
        assert_eq!(
            normalize_key("\\REGISTRY\\USER\\S-1-5-21-1000\\Environment"),
            "HKEY_USERS\\S-1-5-21-1000\\Environment"
        );
        assert_eq!(normalize_key("\\REGISTRY\\USER"), "HKEY_USERS");
        assert_eq!(
            normalize_key("\\REGISTRY\\MACHINEX"),
            "\\REGISTRY\\MACHINEX"
        );
        assert_eq!(normalize_key("Software\\Run"), "Software\\Run");
    }

    #[test]
    fn kcb_resolution() {
        let (interceptor, _) = interceptor();
        let mut kcb = Kevent::new(1, 4, 8, REG_CREATE_KCB)
            .with_param(kparams::KEY_HANDLE, KCB)
            .with_param(
                kparams::KEY_NAME,
                "\\REGISTRY\\MACHINE\\SOFTWARE\\Microsoft\\Windows\\CurrentVersion",
            );
        let (next, res) = interceptor.intercept(&mut kcb);
        assert_eq!(next, Next::Break);
        assert!(res.is_ok());

        let mut kevt = Kevent::new(2, 4321, 4400, REG_SET_VALUE)
            .with_param(kparams::KEY_HANDLE, KCB)
            .with_param(kparams::KEY_NAME, "Run\\updater");
        assert!(interceptor.intercept(&mut kevt).1.is_ok());
        assert_eq!(
            kevt.kparams.get_str(kparams::KEY_NAME),
            Ok("HKEY_LOCAL_MACHINE\\SOFTWARE\\Microsoft\\Windows\\CurrentVersion\\Run\\updater")
        );

        let mut delete = Kevent::new(3, 4, 8, REG_DELETE_KCB).with_param(kparams::KEY_HANDLE, KCB);
        interceptor.intercept(&mut delete).1.unwrap();

        let mut kevt = Kevent::new(4, 4321, 4400, REG_OPEN_KEY)
            .with_param(kparams::KEY_HANDLE, KCB)
            .with_param(kparams::KEY_NAME, "Run");
        interceptor.intercept(&mut kevt).1.unwrap();
        assert_eq!(kevt.kparams.get_str(kparams::KEY_NAME), Ok("Run"));
    }

    #[test]
    fn falls_back_to_the_handle_table() {
        let (interceptor, hsnap) = interceptor();
        hsnap.observe(HandleUpdate::Create(Handle {
            pid: 4321,
            id: 0x80,
            object: KCB,
            type_name: "Key".to_string(),
            name: "\\REGISTRY\\USER\\S-1-5-21-1000_Classes".to_string(),
        }));

        let mut kevt = Kevent::new(1, 4321, 4400, REG_OPEN_KEY)
            .with_param(kparams::KEY_HANDLE, KCB)
            .with_param(kparams::KEY_NAME, "ms-settings\\shell\\open\\command");
        interceptor.intercept(&mut kevt).1.unwrap();
        assert_eq!(
            kevt.kparams.get_str(kparams::KEY_NAME),
            Ok("HKEY_CURRENT_USER\\Software\\Classes\\ms-settings\\shell\\open\\command")
        );
    }

    #[test]
    fn absolute_key_names() {
        let (interceptor, _) = interceptor();
        let mut kevt = Kevent::new(1, 4321, 4400, REG_OPEN_KEY)
            .with_param(kparams::KEY_HANDLE, 0u64)
            .with_param(kparams::KEY_NAME, "\\REGISTRY\\MACHINE\\SAM");
        interceptor.intercept(&mut kevt).1.unwrap();
        assert_eq!(
            kevt.kparams.get_str(kparams::KEY_NAME),
            Ok("HKEY_LOCAL_MACHINE\\SAM")
        );
    }

    #[test]
    fn malformed_kcb_is_a_failure() {
        let (interceptor, _) = interceptor();
        let mut kcb = Kevent::new(1, 4, 8, REG_KCB_RUNDOWN).with_param(kparams::KEY_HANDLE, KCB);
        let (next, res) = interceptor.intercept(&mut kcb);
        assert_eq!(next, Next::Continue);
        assert!(res.is_err());
    }
}
