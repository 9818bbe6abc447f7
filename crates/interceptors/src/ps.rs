use std::{path::Path, sync::Arc};

use kmon_core::{
    Kevent, KparamsError, kparams,
    ktypes::{
        CREATE_PROCESS, CREATE_THREAD, ENUM_PROCESS, ENUM_THREAD, TERMINATE_PROCESS,
        TERMINATE_THREAD,
    },
    ps::{Pid, ProcessInfo, ProcessSnapshotter, TrackerUpdate},
    scanner::Scanner,
};

use crate::{Intercept, InterceptError, Intercepted, cancel, fail, proceed};

/// Maintains the process snapshotter and attaches the process context to
/// every kernel event.
pub struct PsInterceptor {
    psnap: Arc<dyn ProcessSnapshotter>,
    scanner: Option<Arc<dyn Scanner>>,
}

impl PsInterceptor {
    pub fn new(psnap: Arc<dyn ProcessSnapshotter>, scanner: Option<Arc<dyn Scanner>>) -> Self {
        Self { psnap, scanner }
    }

    fn attach(&self, kevt: &mut Kevent, pid: Pid) {
        match self.psnap.lookup(pid) {
            Ok(ps) => kevt.ps = Some(ps),
            Err(err) => log::trace!("{} (seq={}): {err}", kevt.ktype(), kevt.seq),
        }
    }

    fn scan(&self, kevt: &mut Kevent, exe: &str) -> Result<(), InterceptError> {
        let Some(scanner) = &self.scanner else {
            return Ok(());
        };
        if exe.is_empty() {
            return Ok(());
        }
        let matches = scanner
            .scan_file(Path::new(exe))
            .map_err(|error| InterceptError::Scan {
                target: exe.to_string(),
                error,
            })?;
        if !matches.is_empty() {
            log::warn!("{exe} matched {} scan rules", matches.len());
            let rules = matches.into_iter().map(|m| m.rule).collect::<Vec<_>>();
            kevt.kparams.insert(kparams::YARA_MATCHES, rules);
        }
        Ok(())
    }
}

impl Intercept for PsInterceptor {
    fn name(&self) -> &'static str {
        "process"
    }

    fn intercept(&self, kevt: &mut Kevent) -> Intercepted {
        match kevt.ktype() {
            ktype @ (CREATE_PROCESS | ENUM_PROCESS) => {
                let ps = match process_info(kevt) {
                    Ok(ps) => ps,
                    Err(err) => return fail(err),
                };
                if ktype == ENUM_PROCESS && self.psnap.contains(ps.pid) {
                    log::trace!("process {} already enumerated", ps.pid);
                    return cancel();
                }
                self.psnap.observe(TrackerUpdate::Create(ps.clone()));
                let exe = ps.exe.clone();
                kevt.ps = Some(ps);
                if ktype == CREATE_PROCESS {
                    if let Err(err) = self.scan(kevt, &exe) {
                        return fail(err);
                    }
                }
                proceed()
            }
            TERMINATE_PROCESS => {
                let pid = match kevt.kparams.get_u32(kparams::PID) {
                    Ok(pid) => pid,
                    Err(err) => return fail(err),
                };
                self.attach(kevt, pid);
                self.psnap.observe(TrackerUpdate::Terminate { pid });
                proceed()
            }
            ktype @ (CREATE_THREAD | ENUM_THREAD | TERMINATE_THREAD) => {
                let (pid, tid) = match thread_ids(kevt) {
                    Ok(ids) => ids,
                    Err(err) => return fail(err),
                };
                let update = if ktype == TERMINATE_THREAD {
                    TrackerUpdate::TerminateThread { pid, tid }
                } else {
                    TrackerUpdate::CreateThread { pid, tid }
                };
                self.psnap.observe(update);
                self.attach(kevt, pid);
                proceed()
            }
            _ => {
                self.attach(kevt, kevt.pid);
                proceed()
            }
        }
    }
}

fn thread_ids(kevt: &Kevent) -> Result<(Pid, u32), KparamsError> {
    let pid = match kevt.kparams.get_u32(kparams::PID) {
        Err(KparamsError::NotFound(_)) => kevt.pid,
        res => res?,
    };
    let tid = match kevt.kparams.get_u32(kparams::TID) {
        Err(KparamsError::NotFound(_)) => kevt.tid,
        res => res?,
    };
    Ok((pid, tid))
}

fn process_info(kevt: &Kevent) -> Result<ProcessInfo, KparamsError> {
    let kpars = &kevt.kparams;
    let exe = optional(kpars.get_string(kparams::EXE))?.unwrap_or_default();
    let name = match optional(kpars.get_string(kparams::PROCESS_NAME))? {
        Some(name) => name,
        None => exe.rsplit('\\').next().unwrap_or_default().to_string(),
    };
    Ok(ProcessInfo {
        pid: kpars.get_u32(kparams::PID)?,
        ppid: kpars.get_u32(kparams::PPID)?,
        name,
        exe,
        comm: optional(kpars.get_string(kparams::COMM))?.unwrap_or_default(),
        session_id: optional(kpars.get_u32(kparams::SESSION_ID))?.unwrap_or_default(),
        sid: optional(kpars.get_string(kparams::SID))?.unwrap_or_default(),
        start_time: Some(kevt.timestamp),
        ..Default::default()
    })
}

/// Turns a missing parameter into `None`, keeping type errors.
pub(crate) fn optional<T>(res: Result<T, KparamsError>) -> Result<Option<T>, KparamsError> {
    match res {
        Ok(value) => Ok(Some(value)),
        Err(KparamsError::NotFound(_)) => Ok(None),
        Err(err) => Err(err),
    }
}
