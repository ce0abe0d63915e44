//! Windows job objects.
//!
//! The job is created before the root process. The root starts suspended, is
//! assigned to the job, and only then resumed, so no descendant can be created
//! outside the job. The job is configured kill-on-close: releasing the last
//! handle terminates anything still inside.

use std::ffi::c_void;
use std::io;
use std::mem;
use std::ptr;

use tokio::process::{Child, Command};
use windows_sys::Win32::Foundation::{CloseHandle, HANDLE, INVALID_HANDLE_VALUE};
use windows_sys::Win32::System::Console::{CTRL_BREAK_EVENT, GenerateConsoleCtrlEvent};
use windows_sys::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, TH32CS_SNAPTHREAD, THREADENTRY32, Thread32First, Thread32Next,
};
use windows_sys::Win32::System::JobObjects::{
    AssignProcessToJobObject, CreateJobObjectW, JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE,
    JOBOBJECT_BASIC_ACCOUNTING_INFORMATION, JOBOBJECT_EXTENDED_LIMIT_INFORMATION,
    JOBOBJECTINFOCLASS, JobObjectBasicAccountingInformation, JobObjectExtendedLimitInformation,
    QueryInformationJobObject, SetInformationJobObject, TerminateJobObject,
};
use windows_sys::Win32::System::Threading::{
    CREATE_NEW_PROCESS_GROUP, CREATE_SUSPENDED, OpenThread, ResumeThread, THREAD_SUSPEND_RESUME,
};

use super::{GroupControl, KillOutcome};

const TERMINATED_EXIT_CODE: u32 = 1;

#[derive(Debug)]
struct WinHandle {
    handle: HANDLE,
}

// SAFETY: `HANDLE` is a kernel object identifier with no thread affinity. It is
// closed exactly once, on drop.
unsafe impl Send for WinHandle {}

impl Drop for WinHandle {
    fn drop(&mut self) {
        if self.handle.is_null() || self.handle == INVALID_HANDLE_VALUE {
            return;
        }
        // SAFETY: Handle was returned by Win32 APIs in this module.
        unsafe {
            CloseHandle(self.handle);
        }
    }
}

#[derive(Debug)]
pub(crate) struct JobObject {
    job: Option<WinHandle>,
    pid: Option<u32>,
}

impl GroupControl for JobObject {
    fn allocate() -> io::Result<Self> {
        Ok(Self {
            job: Some(create_kill_on_close_job()?),
            pid: None,
        })
    }

    fn prepare(&self, command: &mut Command) {
        command.creation_flags(CREATE_SUSPENDED | CREATE_NEW_PROCESS_GROUP);
    }

    fn attach(&mut self, child: &Child) -> io::Result<()> {
        let job = self.handle()?;
        let process_handle = child
            .raw_handle()
            .ok_or_else(|| io::Error::other("child process handle unavailable"))?
            as HANDLE;
        let pid = child
            .id()
            .ok_or_else(|| io::Error::other("child process id unavailable"))?;

        // SAFETY: `job` and `process_handle` are valid handles.
        if unsafe { AssignProcessToJobObject(job, process_handle) } == 0 {
            return Err(last_os_error("AssignProcessToJobObject"));
        }
        resume_process(pid)?;
        self.pid = Some(pid);
        Ok(())
    }

    fn signal_graceful(&self) -> io::Result<KillOutcome> {
        let Some(pid) = self.pid else {
            return Ok(KillOutcome::NotRunning);
        };
        if self.is_empty() {
            return Ok(KillOutcome::NotRunning);
        }
        // The root leads its own console process group, so CTRL_BREAK reaches
        // the root and every console descendant sharing it.
        // SAFETY: plain Win32 call.
        if unsafe { GenerateConsoleCtrlEvent(CTRL_BREAK_EVENT, pid) } == 0 {
            return Err(last_os_error("GenerateConsoleCtrlEvent"));
        }
        Ok(KillOutcome::Killed)
    }

    fn kill(&self) -> io::Result<KillOutcome> {
        let Ok(job) = self.handle() else {
            return Ok(KillOutcome::NotRunning);
        };
        if self.is_empty() {
            return Ok(KillOutcome::NotRunning);
        }
        // SAFETY: `job` is a valid job handle.
        if unsafe { TerminateJobObject(job, TERMINATED_EXIT_CODE) } == 0 {
            return Err(last_os_error("TerminateJobObject"));
        }
        Ok(KillOutcome::Killed)
    }

    fn is_empty(&self) -> bool {
        let Ok(job) = self.handle() else {
            return true;
        };
        let mut info = JOBOBJECT_BASIC_ACCOUNTING_INFORMATION::default();
        match query_job_information(job, JobObjectBasicAccountingInformation, &mut info) {
            Ok(()) => info.ActiveProcesses == 0,
            Err(e) => {
                tracing::debug!("Job accounting query failed: {e}");
                false
            }
        }
    }

    fn release(&mut self) {
        self.job = None;
        self.pid = None;
    }
}

impl JobObject {
    fn handle(&self) -> io::Result<HANDLE> {
        self.job
            .as_ref()
            .map(|job| job.handle)
            .ok_or_else(|| io::Error::other("job object already released"))
    }
}

fn create_kill_on_close_job() -> io::Result<WinHandle> {
    // SAFETY: Passing null security attributes/name requests an unnamed job
    // with default security descriptor.
    let handle = unsafe { CreateJobObjectW(ptr::null(), ptr::null()) };
    if handle.is_null() {
        return Err(last_os_error("CreateJobObjectW"));
    }

    let job = WinHandle { handle };
    let mut limits = JOBOBJECT_EXTENDED_LIMIT_INFORMATION::default();
    limits.BasicLimitInformation.LimitFlags = JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE;
    set_job_information(job.handle, JobObjectExtendedLimitInformation, &limits)?;
    Ok(job)
}

fn set_job_information<T>(
    job_handle: HANDLE,
    info_class: JOBOBJECTINFOCLASS,
    value: &T,
) -> io::Result<()> {
    let info_len = u32::try_from(mem::size_of::<T>()).map_err(io::Error::other)?;
    // SAFETY: `value` points to a valid initialized payload of `info_len` bytes.
    let ok = unsafe {
        SetInformationJobObject(
            job_handle,
            info_class,
            ptr::from_ref(value).cast::<c_void>(),
            info_len,
        )
    };
    if ok == 0 {
        return Err(last_os_error("SetInformationJobObject"));
    }
    Ok(())
}

fn query_job_information<T>(
    job_handle: HANDLE,
    info_class: JOBOBJECTINFOCLASS,
    value: &mut T,
) -> io::Result<()> {
    let info_len = u32::try_from(mem::size_of::<T>()).map_err(io::Error::other)?;
    // SAFETY: `value` is a writable buffer of `info_len` bytes.
    let ok = unsafe {
        QueryInformationJobObject(
            job_handle,
            info_class,
            ptr::from_mut(value).cast::<c_void>(),
            info_len,
            ptr::null_mut(),
        )
    };
    if ok == 0 {
        return Err(last_os_error("QueryInformationJobObject"));
    }
    Ok(())
}

/// Resume every thread of a process created with `CREATE_SUSPENDED`.
fn resume_process(pid: u32) -> io::Result<()> {
    // SAFETY: plain Win32 call; the snapshot handle is owned below.
    let snapshot = unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPTHREAD, 0) };
    if snapshot == INVALID_HANDLE_VALUE {
        return Err(last_os_error("CreateToolhelp32Snapshot"));
    }
    let snapshot = WinHandle { handle: snapshot };

    let mut entry = THREADENTRY32 {
        dwSize: u32::try_from(mem::size_of::<THREADENTRY32>()).map_err(io::Error::other)?,
        ..Default::default()
    };
    let mut resumed = 0usize;
    // SAFETY: `entry.dwSize` is initialized as the API requires.
    let mut more = unsafe { Thread32First(snapshot.handle, &raw mut entry) } != 0;
    while more {
        if entry.th32OwnerProcessID == pid {
            // SAFETY: plain Win32 call; the thread handle is owned below.
            let thread = unsafe { OpenThread(THREAD_SUSPEND_RESUME, 0, entry.th32ThreadID) };
            if !thread.is_null() {
                let thread = WinHandle { handle: thread };
                // SAFETY: `thread` is a valid handle with THREAD_SUSPEND_RESUME.
                if unsafe { ResumeThread(thread.handle) } != u32::MAX {
                    resumed += 1;
                }
            }
        }
        // SAFETY: same snapshot and entry as above.
        more = unsafe { Thread32Next(snapshot.handle, &raw mut entry) } != 0;
    }

    if resumed == 0 {
        return Err(io::Error::other(format!(
            "no suspended thread found for process {pid}"
        )));
    }
    Ok(())
}

fn last_os_error(operation: &str) -> io::Error {
    let err = io::Error::last_os_error();
    io::Error::new(err.kind(), format!("{operation} failed: {err}"))
}
