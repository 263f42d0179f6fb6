//! Operator confirmation between groups.

use std::io::{BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::exit_codes;

/// Operator's answer at a gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Proceed,
    Abort,
}

/// Blocks the runner between groups until the operator decides.
pub trait ConfirmationGate {
    /// Ask whether to continue with `next_group`.
    fn confirm(&self, next_group: &str) -> Result<Confirmation>;

    /// True once the operator asked to stop, even if no gate has been shown
    /// since. Checked after the final group, where no gate follows.
    fn interrupt_pending(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    Line,
    EndOfInput,
    Interrupt,
}

/// Gate backed by the terminal: Enter proceeds, Ctrl+C or end of input aborts.
///
/// Installing the gate replaces the default SIGINT behavior. An interrupt that
/// arrives while a group is still running is held and honored at the next
/// gate, so a group is never abandoned halfway through its phases. A held
/// interrupt wins over any line typed ahead. A second interrupt exits the
/// process immediately.
pub struct TerminalGate {
    signals: Receiver<Signal>,
    interrupted: Arc<AtomicBool>,
}

impl TerminalGate {
    /// Install the Ctrl+C handler and start the stdin reader.
    ///
    /// Can only be called once per process.
    pub fn install() -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let interrupted = Arc::new(AtomicBool::new(false));

        let interrupt_tx = tx.clone();
        let flag = Arc::clone(&interrupted);
        ctrlc::set_handler(move || {
            if raise_interrupt(&flag, &interrupt_tx) {
                eprintln!("Interrupted again, exiting now.");
                std::process::exit(exit_codes::INTERRUPTED);
            }
            eprintln!("Interrupt received, stopping once the current group finishes.");
            eprintln!("Press Ctrl+C again to exit now.");
        })
        .context("install interrupt handler")?;

        thread::Builder::new()
            .name("rollout-stdin".to_string())
            .spawn(move || read_lines(std::io::stdin().lock(), tx))
            .context("spawn stdin reader")?;

        Ok(Self {
            signals: rx,
            interrupted,
        })
    }
}

/// Mark an interrupt as pending and wake a blocked gate.
///
/// Returns true if one was already pending.
fn raise_interrupt(flag: &AtomicBool, tx: &Sender<Signal>) -> bool {
    let already = flag.swap(true, Ordering::SeqCst);
    if !already {
        // The receiver lives as long as the gate; a send error only means
        // the run is already over.
        let _ = tx.send(Signal::Interrupt);
    }
    already
}

fn read_lines<R: BufRead>(mut input: R, tx: Sender<Signal>) {
    let mut line = String::new();
    loop {
        line.clear();
        let signal = match input.read_line(&mut line) {
            Ok(0) => Signal::EndOfInput,
            Ok(_) => Signal::Line,
            Err(err) => {
                warn!(err = %err, "stdin read failed");
                Signal::EndOfInput
            }
        };
        if tx.send(signal).is_err() || signal == Signal::EndOfInput {
            return;
        }
    }
}

impl ConfirmationGate for TerminalGate {
    fn confirm(&self, next_group: &str) -> Result<Confirmation> {
        if self.interrupt_pending() {
            debug!(next_group, "interrupt pending, not prompting");
            return Ok(Confirmation::Abort);
        }

        let mut stdout = std::io::stdout().lock();
        writeln!(stdout)?;
        writeln!(stdout, "Press Enter to start {next_group} or Ctrl+C to exit.")?;
        stdout.flush().context("flush prompt")?;
        drop(stdout);

        // A closed channel means both the reader and the handler are gone.
        let signal = self.signals.recv().unwrap_or(Signal::EndOfInput);
        debug!(?signal, next_group, "gate answered");
        if self.interrupt_pending() {
            return Ok(Confirmation::Abort);
        }
        Ok(match signal {
            Signal::Line => Confirmation::Proceed,
            Signal::EndOfInput | Signal::Interrupt => Confirmation::Abort,
        })
    }

    fn interrupt_pending(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }
}
