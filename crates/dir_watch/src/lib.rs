//! Directory watcher over Linux inotify.
//!
//! One monitor thread per watcher blocks on `poll` over the inotify
//! descriptor and a self-pipe; shutdown writes one byte to the pipe and
//! joins the thread. Watch registrations are shared between the public API
//! and the monitor through mutexed descriptor↔path maps; the lock is held
//! only for lookup and mutation, never across the sink call.
//!
//! The sink runs on the monitor thread. It must not call [`DirWatcher::stop`]
//! on the same watcher (that would deadlock on the join) and must not block
//! indefinitely; operating an unrelated store from the sink is fine.

#![deny(unsafe_code)]

use inotify::{Inotify, WatchMask, Watches};
use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::poll::{poll, PollFd, PollFlags};
use nix::unistd;
use seal_core::{Error, Result};
use std::collections::HashMap;
use std::ffi::OsString;
use std::fmt;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

bitflags::bitflags! {
    /// What happened to a watched path.
    ///
    /// `QUEUE_OVERFLOW` and `WATCH_REMOVED` are synthesized from the kernel
    /// conditions of the same name; the rest map one-to-one onto inotify
    /// event bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EventMask: u32 {
        /// File content changed.
        const MODIFY = 1 << 0;
        /// A writable file descriptor on the file was closed.
        const CLOSE_WRITE = 1 << 1;
        /// Metadata (permissions, timestamps, ...) changed.
        const ATTRIB = 1 << 2;
        /// An entry was created inside a watched directory.
        const CREATE = 1 << 3;
        /// An entry was deleted inside a watched directory.
        const DELETE = 1 << 4;
        /// An entry was moved out of a watched directory.
        const MOVED_FROM = 1 << 5;
        /// An entry was moved into a watched directory.
        const MOVED_TO = 1 << 6;
        /// The watched path itself was deleted.
        const DELETE_SELF = 1 << 7;
        /// The watched path itself was moved.
        const MOVE_SELF = 1 << 8;
        /// The kernel queue overflowed; events were lost.
        const QUEUE_OVERFLOW = 1 << 9;
        /// The kernel dropped the watch (deletion, unmount).
        const WATCH_REMOVED = 1 << 10;
    }
}

impl fmt::Display for EventMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, _) in self.iter_names() {
            if !first {
                f.write_str("|")?;
            }
            f.write_str(name)?;
            first = false;
        }
        if first {
            f.write_str("NONE")?;
        }
        Ok(())
    }
}

/// A single filesystem observation delivered to the sink.
#[derive(Debug, Clone)]
pub struct WatchedEvent {
    /// The path as originally registered with `add_watch`.
    pub watched_path: PathBuf,
    /// Affected child for directory watches; empty for file watches and
    /// synthesized events.
    pub entry_name: OsString,
    /// What happened.
    pub mask: EventMask,
    /// Whether the affected entry is a directory.
    pub is_dir: bool,
    /// Human-readable rendering of `mask`, for logs and diagnostics.
    pub textual_name: String,
}

/// Receives events on the monitor thread.
pub trait EventSink: Send + Sync {
    /// Called once per event. Must not panic, must not block indefinitely,
    /// and must not stop the delivering watcher.
    fn on_event(&self, event: &WatchedEvent);
}

#[derive(Default)]
struct WatchMaps {
    by_wd: HashMap<inotify::WatchDescriptor, PathBuf>,
    by_path: HashMap<PathBuf, inotify::WatchDescriptor>,
}

enum State {
    Idle,
    Running {
        thread: JoinHandle<()>,
        watches: Watches,
        wake_tx: RawFd,
        wake_rx: RawFd,
    },
    Stopped,
}

/// Watcher with an Idle → Running → Stopped lifecycle.
///
/// `start` is idempotent while running; once stopped the instance is
/// terminal and a fresh watcher must be created.
pub struct DirWatcher {
    state: Mutex<State>,
    maps: Arc<Mutex<WatchMaps>>,
    sink: Option<Arc<dyn EventSink>>,
}

impl DirWatcher {
    /// Create an idle watcher. Events go to `sink` once started; with no
    /// sink the watcher still logs every event at INFO.
    pub fn new(sink: Option<Arc<dyn EventSink>>) -> Self {
        Self { state: Mutex::new(State::Idle), maps: Arc::new(Mutex::new(WatchMaps::default())), sink }
    }

    /// Bring up the inotify instance, the wake pipe and the monitor thread.
    ///
    /// Calling `start` on a running watcher is a no-op; on a stopped one it
    /// fails with `WatcherStartFailed`.
    pub fn start(&self) -> Result<()> {
        let mut state = lock(&self.state);
        match &*state {
            State::Running { .. } => return Ok(()),
            State::Stopped => {
                return Err(Error::WatcherStartFailed("watcher is stopped; create a new instance".into()))
            }
            State::Idle => {}
        }

        let inotify =
            Inotify::init().map_err(|e| Error::WatcherStartFailed(format!("inotify init: {e}")))?;
        let (wake_rx, wake_tx) = unistd::pipe()
            .map_err(|e| Error::WatcherStartFailed(format!("wake pipe: {e}")))?;
        if let Err(e) = fcntl(wake_rx, FcntlArg::F_SETFL(OFlag::O_NONBLOCK)) {
            let _ = unistd::close(wake_rx);
            let _ = unistd::close(wake_tx);
            return Err(Error::WatcherStartFailed(format!("wake pipe fcntl: {e}")));
        }

        let watches = inotify.watches();
        let maps = Arc::clone(&self.maps);
        let sink = self.sink.clone();
        let thread = std::thread::Builder::new()
            .name("dir-watch-monitor".into())
            .spawn(move || monitor_loop(inotify, wake_rx, &maps, sink.as_deref()))
            .map_err(|e| {
                let _ = unistd::close(wake_rx);
                let _ = unistd::close(wake_tx);
                Error::WatcherStartFailed(format!("monitor thread: {e}"))
            })?;

        *state = State::Running { thread, watches, wake_tx, wake_rx };
        debug!("directory watcher started");
        Ok(())
    }

    /// Register `path` (which must exist) for the full event set.
    /// Adding an already-watched path is a no-op.
    pub fn add_watch(&self, path: &Path) -> Result<()> {
        let mut state = lock(&self.state);
        let State::Running { watches, .. } = &mut *state else {
            return Err(Error::NotInitialized);
        };

        {
            let maps = lock(&self.maps);
            if maps.by_path.contains_key(path) {
                return Ok(());
            }
        }

        let wd = watches.add(path, kernel_watch_mask()).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                Error::PathNotFound(path.to_path_buf())
            } else {
                Error::WatcherStartFailed(format!("add watch on {}: {e}", path.display()))
            }
        })?;

        let mut maps = lock(&self.maps);
        maps.by_wd.insert(wd.clone(), path.to_path_buf());
        maps.by_path.insert(path.to_path_buf(), wd);
        debug!(path = %path.display(), "watch added");
        Ok(())
    }

    /// Deregister `path`. Unknown paths, including watches the kernel
    /// already dropped, are not an error.
    pub fn remove_watch(&self, path: &Path) -> Result<()> {
        let mut state = lock(&self.state);
        let State::Running { watches, .. } = &mut *state else {
            return Ok(());
        };

        let wd = {
            let mut maps = lock(&self.maps);
            let Some(wd) = maps.by_path.remove(path) else {
                return Ok(());
            };
            maps.by_wd.remove(&wd);
            wd
        };
        if let Err(e) = watches.remove(wd) {
            // Racing a kernel-side auto-removal is expected.
            debug!(path = %path.display(), error = %e, "kernel watch already gone");
        }
        Ok(())
    }

    /// Signal the monitor thread, join it, release the descriptors and
    /// latch the terminal state. Safe to call repeatedly and from any
    /// thread except the monitor thread itself; tolerant of never-started
    /// and failed-start states.
    pub fn stop(&self) -> Result<()> {
        let previous = {
            let mut state = lock(&self.state);
            std::mem::replace(&mut *state, State::Stopped)
        };

        if let State::Running { thread, wake_tx, wake_rx, watches: _ } = previous {
            if let Err(e) = unistd::write(wake_tx, &[1u8]) {
                warn!(error = %e, "wake pipe write failed; joining anyway");
            }
            if thread.join().is_err() {
                warn!("monitor thread panicked before join");
            }
            let _ = unistd::close(wake_tx);
            let _ = unistd::close(wake_rx);
        }

        let mut maps = lock(&self.maps);
        maps.by_wd.clear();
        maps.by_path.clear();
        debug!("directory watcher stopped");
        Ok(())
    }

    /// Whether the monitor thread is up.
    pub fn is_running(&self) -> bool {
        matches!(&*lock(&self.state), State::Running { .. })
    }
}

impl Drop for DirWatcher {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A poisoned map or state is still structurally sound; the panic that
    // poisoned it was already reported on the owning thread.
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn kernel_watch_mask() -> WatchMask {
    WatchMask::MODIFY
        | WatchMask::CLOSE_WRITE
        | WatchMask::ATTRIB
        | WatchMask::CREATE
        | WatchMask::DELETE
        | WatchMask::MOVED_FROM
        | WatchMask::MOVED_TO
        | WatchMask::DELETE_SELF
        | WatchMask::MOVE_SELF
}

fn convert_mask(mask: inotify::EventMask) -> EventMask {
    const TABLE: &[(inotify::EventMask, EventMask)] = &[
        (inotify::EventMask::MODIFY, EventMask::MODIFY),
        (inotify::EventMask::CLOSE_WRITE, EventMask::CLOSE_WRITE),
        (inotify::EventMask::ATTRIB, EventMask::ATTRIB),
        (inotify::EventMask::CREATE, EventMask::CREATE),
        (inotify::EventMask::DELETE, EventMask::DELETE),
        (inotify::EventMask::MOVED_FROM, EventMask::MOVED_FROM),
        (inotify::EventMask::MOVED_TO, EventMask::MOVED_TO),
        (inotify::EventMask::DELETE_SELF, EventMask::DELETE_SELF),
        (inotify::EventMask::MOVE_SELF, EventMask::MOVE_SELF),
        (inotify::EventMask::Q_OVERFLOW, EventMask::QUEUE_OVERFLOW),
        (inotify::EventMask::IGNORED, EventMask::WATCH_REMOVED),
    ];
    let mut out = EventMask::empty();
    for (theirs, ours) in TABLE {
        if mask.contains(*theirs) {
            out |= *ours;
        }
    }
    out
}

fn monitor_loop(
    mut inotify: Inotify,
    wake_rx: RawFd,
    maps: &Mutex<WatchMaps>,
    sink: Option<&dyn EventSink>,
) {
    let inotify_fd = inotify.as_raw_fd();
    let mut buffer = [0u8; 4096];

    loop {
        let mut fds =
            [PollFd::new(inotify_fd, PollFlags::POLLIN), PollFd::new(wake_rx, PollFlags::POLLIN)];
        match poll(&mut fds, -1) {
            Err(Errno::EINTR) => continue,
            Err(e) => {
                warn!(error = %e, "poll failed; monitor loop exiting");
                break;
            }
            Ok(_) => {}
        }

        let wake = fds[1].revents().unwrap_or(PollFlags::empty());
        if wake.intersects(PollFlags::POLLIN | PollFlags::POLLHUP) {
            drain_wake_pipe(wake_rx);
            break;
        }

        if !fds[0].revents().unwrap_or(PollFlags::empty()).contains(PollFlags::POLLIN) {
            continue;
        }
        let events = match inotify.read_events(&mut buffer) {
            Ok(events) => events,
            // Readiness without data and interrupted reads are both benign.
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::Interrupted =>
            {
                continue
            }
            Err(e) => {
                warn!(error = %e, "inotify read failed");
                continue;
            }
        };
        for event in events {
            deliver(&event, maps, sink);
        }
    }
}

fn deliver(event: &inotify::Event<&std::ffi::OsStr>, maps: &Mutex<WatchMaps>, sink: Option<&dyn EventSink>) {
    let mask = convert_mask(event.mask);

    if mask.contains(EventMask::QUEUE_OVERFLOW) {
        let overflow = WatchedEvent {
            watched_path: PathBuf::new(),
            entry_name: OsString::new(),
            mask: EventMask::QUEUE_OVERFLOW,
            is_dir: false,
            textual_name: EventMask::QUEUE_OVERFLOW.to_string(),
        };
        warn!("inotify queue overflowed; events were lost");
        if let Some(sink) = sink {
            sink.on_event(&overflow);
        }
        return;
    }

    let watched_path = {
        let mut maps = lock(maps);
        if mask.contains(EventMask::WATCH_REMOVED) {
            maps.by_wd.remove(&event.wd).map(|path| {
                maps.by_path.remove(&path);
                path
            })
        } else {
            maps.by_wd.get(&event.wd).cloned()
        }
    };
    let Some(watched_path) = watched_path else {
        debug!(mask = %mask, "event for an unregistered watch descriptor");
        return;
    };

    let out = WatchedEvent {
        watched_path,
        entry_name: event.name.map(OsString::from).unwrap_or_default(),
        mask,
        is_dir: event.mask.contains(inotify::EventMask::ISDIR),
        textual_name: mask.to_string(),
    };
    info!(
        path = %out.watched_path.display(),
        entry = ?out.entry_name,
        mask = %out.textual_name,
        is_dir = out.is_dir,
        "filesystem event"
    );
    if let Some(sink) = sink {
        sink.on_event(&out);
    }
}

fn drain_wake_pipe(fd: RawFd) {
    let mut buf = [0u8; 64];
    loop {
        match unistd::read(fd, &mut buf) {
            Ok(0) => break,
            Ok(_) => continue,
            Err(Errno::EINTR) => continue,
            Err(Errno::EAGAIN) => break,
            Err(e) => {
                debug!(error = %e, "wake pipe drain failed");
                break;
            }
        }
    }
}
