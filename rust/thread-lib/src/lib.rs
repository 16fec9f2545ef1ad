use libc::{CPU_SET, CPU_ZERO, cpu_set_t, pthread_self, pthread_setaffinity_np};
use syscalls::Errno;
use tracing::warn;

pub fn pin_cpu(cpu: usize) -> Result<(), Errno> {
    unsafe {
        let mut cpuset = std::mem::zeroed();
        CPU_ZERO(&mut cpuset);
        CPU_SET(cpu, &mut cpuset);
        let ret =
            pthread_setaffinity_np(pthread_self(), size_of::<cpu_set_t>(), &cpuset);
        if ret != 0 {
            return Err(Errno::new(ret));
        }
        Ok(())
    }
}

/// Spawn a named execution-unit thread, optionally pinned to `cpu`.
///
/// A failed pin is reported but not fatal; the unit still runs, just without
/// the affinity.
pub fn spawn_unit<T, F>(
    name: String,
    cpu: Option<u16>,
    f: F,
) -> std::io::Result<std::thread::JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    std::thread::Builder::new().name(name.clone()).spawn(move || {
        if let Some(cpu) = cpu
            && let Err(e) = pin_cpu(cpu.into())
        {
            warn!("failed to pin {} to CPU {}: {:?}", name, cpu, e);
        }
        f()
    })
}
