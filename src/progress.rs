use crate::status::Status;
use std::mem::ManuallyDrop;
use std::sync::{
    atomic::{AtomicBool, Ordering::Relaxed},
    Arc,
};
use std::thread;

const RENDER_FREQUENCY: std::time::Duration = std::time::Duration::from_millis(100);

pub struct Progress {
    cancel: Arc<AtomicBool>,
    thread: ManuallyDrop<thread::JoinHandle<()>>,
}

impl Progress {
    pub fn new(status: Arc<Status>) -> Option<Self> {
        let cancel = Arc::new(AtomicBool::new(false));
        let mut renderer = Renderer::new(status)?;
        Some(Progress {
            cancel: cancel.clone(),
            thread: ManuallyDrop::new(thread::spawn(move || {
                while !cancel.load(Relaxed) {
                    if let Err(e) = renderer.render() {
                        log::warn!("failed to render to terminal: {e}");
                    }
                    thread::sleep(RENDER_FREQUENCY);
                }
            })),
        })
    }
}

impl Drop for Progress {
    fn drop(&mut self) {
        self.cancel.store(true, Relaxed);
        unsafe { ManuallyDrop::take(&mut self.thread) }
            .join()
            .unwrap();
    }
}

struct Renderer {
    terminal: Box<term::StderrTerminal>,
    status: Arc<Status>,
    last_lines: usize,
}

impl Renderer {
    fn new(status: Arc<Status>) -> Option<Self> {
        Some(Renderer {
            terminal: term::stderr()?,
            status,
            last_lines: 0,
        })
    }

    fn render(&mut self) -> term::Result<()> {
        // Reset from last render
        for i in 0..std::mem::replace(&mut self.last_lines, 0) {
            if i == 0 {
                self.terminal.carriage_return()?;
            } else {
                self.terminal.cursor_up()?;
            }
            self.terminal.delete_line()?;
        }

        if !self.status.crashes.done() {
            let complete = self.status.crashes.complete_count();
            let total = self.status.crashes.total_count();
            write!(
                self.terminal,
                "Crashes: {:.1}% ({}/{}), {} failed",
                complete as f64 * 100. / total.max(1) as f64,
                complete,
                total,
                self.status.crashes.failed_count(),
            )?;
            self.last_lines += 1;
        }

        if self.status.is_cancelled() {
            if self.last_lines > 0 {
                writeln!(self.terminal)?;
            }
            write!(self.terminal, "Cancelling...")?;
            self.last_lines += 1;
        }

        Ok(())
    }
}
