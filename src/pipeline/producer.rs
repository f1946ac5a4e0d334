//! Producer Stage
//!
//! A demand-driven source: an internal FIFO paired with a pending-demand
//! counter. Downstream demand pops queued records immediately; a shortfall
//! is remembered and satisfied as new records arrive. Enqueueing never
//! blocks the caller — backpressure lives entirely at the consumer stage,
//! which controls how much demand it signals.
//!
//! ## Architecture
//!
//! ```text
//! Feeder --Enqueue--► Producer worker --batches--► ProducerConsumer
//! Consumer --Demand(n)----┘
//! ```

use crate::value::Record;
use crossbeam_channel as channel;
use std::collections::VecDeque;
use std::thread::JoinHandle;

/// Commands accepted by a producer worker.
#[derive(Debug)]
pub enum ProducerCommand {
    /// Append records to the internal queue.
    Enqueue(Vec<Record>),
    /// Downstream asks for up to `n` more records.
    Demand(usize),
    /// No further records will be enqueued; drain and shut down.
    Complete,
    /// Shut down immediately, discarding queued records.
    Stop,
}

/// Handle to a spawned producer stage.
pub struct Producer {
    pub commands: channel::Sender<ProducerCommand>,
    pub handle: JoinHandle<()>,
}

impl Producer {
    /// Spawn the producer worker. Batches are capped at `max_batch` records
    /// and flow into `out`; dropping `out`'s receiver ends the stage.
    pub fn spawn(out: channel::Sender<Vec<Record>>, max_batch: usize) -> std::io::Result<Producer> {
        let (command_tx, command_rx) = channel::unbounded::<ProducerCommand>();
        let max_batch = max_batch.max(1);

        let handle = std::thread::Builder::new()
            .name("pipeline-producer".to_string())
            .spawn(move || Self::worker_loop(&command_rx, &out, max_batch))?;

        Ok(Producer {
            commands: command_tx,
            handle,
        })
    }

    fn worker_loop(
        command_rx: &channel::Receiver<ProducerCommand>,
        out: &channel::Sender<Vec<Record>>,
        max_batch: usize,
    ) {
        let mut queue: VecDeque<Record> = VecDeque::new();
        let mut pending_demand: usize = 0;
        let mut completed = false;

        for command in command_rx {
            match command {
                ProducerCommand::Enqueue(records) => queue.extend(records),
                ProducerCommand::Demand(n) => pending_demand += n,
                ProducerCommand::Complete => completed = true,
                ProducerCommand::Stop => return,
            }

            // Dispatch as much as current demand allows.
            while pending_demand > 0 && !queue.is_empty() {
                let n = pending_demand.min(queue.len()).min(max_batch);
                let batch: Vec<Record> = queue.drain(..n).collect();
                pending_demand -= n;
                if out.send(batch).is_err() {
                    // Downstream is gone; nothing left to do.
                    return;
                }
            }

            if completed && queue.is_empty() {
                // Dropping `out` signals end-of-stream downstream.
                return;
            }
        }
    }
}
