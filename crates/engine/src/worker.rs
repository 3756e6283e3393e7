//! The intake loop, the worker loop and the per-message pipeline.

use std::{sync::Arc, time::Duration};

use {
    doozer_common::{Abort, CallbackError, CallbackResult, Failure, Message},
    futures::future::join_all,
    serde_json::Value,
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, trace, warn},
    uuid::Uuid,
};

use crate::{
    app::Application,
    consumer::{Consumer, ReadError},
    error::{Error, Result},
    queue::{self, QueueReceiver, QueueSender},
    registry::{HookKind, Processor},
};

/// Shortest idle heartbeat, so a zero `SLEEP_TIME` cannot spin.
const MIN_IDLE: Duration = Duration::from_millis(1);

impl Application {
    /// Feed the consumer's messages to `num_workers` workers until the
    /// consumer ends, then let the workers drain the queue.
    ///
    /// A worker or consumer failure, a cancelled shutdown token and Ctrl-C
    /// all stop intake early. Queued messages are still processed.
    pub(crate) async fn serve(
        &self,
        consumer: Arc<dyn Consumer>,
        processor: Arc<dyn Processor>,
        num_workers: usize,
        idle: Duration,
    ) {
        let (sender, receiver) = queue::bounded(num_workers);
        let cancel = self.shutdown_token().child_token();
        let idle = idle.max(MIN_IDLE);

        let intake = async {
            let result = self.consume(consumer.as_ref(), sender, &cancel).await;
            if let Err(err) = &result {
                error!(error = %err, "loop.canceled");
            }
            result
        };
        let workers = join_all((0..num_workers).map(|worker| {
            self.work(worker, &receiver, processor.as_ref(), &cancel, idle)
        }));

        let work = async { tokio::join!(intake, workers) };
        tokio::pin!(work);

        let (intake, workers) = tokio::select! {
            outcome = &mut work => outcome,
            () = self.interrupted() => {
                warn!(application = %self, "application.interrupted");
                cancel.cancel();
                work.await
            },
        };

        if let Err(err) = intake {
            error!(task = "consumer", error = %err, "tasks.erred");
        }
        for (worker, result) in workers.into_iter().enumerate() {
            if let Err(err) = result {
                error!(task = "worker", worker, error = %err, "tasks.erred");
            }
        }
    }

    /// Resolves when the shutdown token is cancelled or Ctrl-C arrives.
    async fn interrupted(&self) {
        let shutdown = self.shutdown_token();
        tokio::select! {
            () = shutdown.cancelled() => {},
            signal = tokio::signal::ctrl_c() => {
                if signal.is_err() {
                    // No signal handler available; only the token can interrupt.
                    shutdown.cancelled().await;
                }
            },
        }
    }

    /// Read from the consumer and push onto the queue until end of stream
    /// or cancellation. Dropping `queue` on return closes it.
    async fn consume(
        &self,
        consumer: &dyn Consumer,
        queue: QueueSender,
        cancel: &CancellationToken,
    ) -> Result<()> {
        loop {
            let read = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!("consumer.canceled");
                    return Ok(());
                },
                read = consumer.read() => read,
            };
            let message = match read {
                Ok(message) => message,
                Err(ReadError::EndOfStream) => {
                    debug!("consumer.aborted");
                    return Ok(());
                },
                Err(source) => return Err(Error::Consumer { source }),
            };

            // A message in hand is always queued; workers drain until the
            // sender is dropped, so this push completes even after cancel.
            if queue.push(message).await.is_err() {
                debug!("consumer.canceled");
                return Ok(());
            }
        }
    }

    /// Pop and handle messages until the queue is closed and empty.
    ///
    /// A fatal failure cancels intake, but the worker keeps draining so
    /// that nothing already queued is lost. The first such failure is
    /// returned once the queue is empty.
    async fn work(
        &self,
        worker: usize,
        queue: &QueueReceiver,
        processor: &dyn Processor,
        cancel: &CancellationToken,
        idle: Duration,
    ) -> Result<()> {
        let mut fatal = None;
        loop {
            let message = match tokio::time::timeout(idle, queue.pop()).await {
                Ok(Some(message)) => message,
                Ok(None) => break,
                Err(_) => {
                    trace!(worker, "worker.idle");
                    continue;
                },
            };
            if let Err(err) = self.handle(worker, processor, message).await {
                error!(worker, error = %err, "loop.canceled");
                cancel.cancel();
                if fatal.is_none() {
                    fatal = Some(err);
                }
            }
        }
        debug!(worker, "worker.stopped");
        fatal.map_or(Ok(()), Err)
    }

    /// Run one message through the pipeline and acknowledge it.
    ///
    /// Only failures of acknowledgement or error callbacks escape; they
    /// are fatal for the worker.
    async fn handle(&self, worker: usize, processor: &dyn Processor, message: Message) -> Result<()> {
        let original = message.clone();
        let id = original.id;

        let (working, outcome) = self.process(processor, message).await;
        let mut fatal = None;
        match outcome {
            Ok(()) => {},
            Err(CallbackError::Abort(abort)) => aborted(&abort, id),
            Err(CallbackError::Failed(failure)) => {
                error!(
                    message_id = %id,
                    worker,
                    kind = failure.kind(),
                    error = %failure.error(),
                    "message.failed"
                );
                let mut working = working.unwrap_or_else(|| original.clone());
                fatal = self.dispatch_error(&mut working, &failure).await.err();
            },
        }

        self.acknowledge(&original).await?;
        fatal.map_or(Ok(()), Err)
    }

    /// Preprocess, process and postprocess. Returns the working message
    /// when it survived preprocessing.
    async fn process(
        &self,
        processor: &dyn Processor,
        message: Message,
    ) -> (Option<Message>, CallbackResult<()>) {
        let message = match self.callbacks().preprocess(self, message).await {
            Ok(message) => message,
            Err(err) => return (None, Err(err)),
        };
        debug!(message_id = %message.id, "message.preprocessed");

        let results = match processor.process(self, &message).await {
            Ok(results) => results,
            Err(err) => return (Some(message), Err(err)),
        };
        let outcome = self.postprocess(message.id, results).await;
        (Some(message), outcome)
    }

    /// Each result goes through the postprocessor chain on its own; an
    /// abort only skips the result that raised it.
    async fn postprocess(&self, id: Uuid, results: Vec<Value>) -> CallbackResult<()> {
        for result in results {
            match self.callbacks().postprocess(self, result).await {
                Ok(_) => debug!(message_id = %id, "result.postprocessed"),
                Err(CallbackError::Abort(abort)) => aborted(&abort, id),
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Run the error callbacks in order until one aborts.
    async fn dispatch_error(&self, message: &mut Message, failure: &Failure) -> Result<()> {
        for handler in self.callbacks().error_handlers() {
            match handler.handle(self, message, failure).await {
                Ok(()) => {},
                Err(CallbackError::Abort(abort)) => {
                    aborted(&abort, message.id);
                    break;
                },
                Err(source) => {
                    error!(
                        hook = %HookKind::Error,
                        callback = handler.name(),
                        message_id = %message.id,
                        error = %source,
                        "callback.failed"
                    );
                    return Err(Error::callback(HookKind::Error, source));
                },
            }
        }
        Ok(())
    }

    /// Every acknowledgement callback sees the original message, whatever
    /// happened to the working copy. The first failure is reported after
    /// all of them ran.
    async fn acknowledge(&self, original: &Message) -> Result<()> {
        let mut first_failure = None;
        for hook in self.callbacks().acknowledgements() {
            match hook.acknowledge(self, original).await {
                Ok(()) => {},
                Err(CallbackError::Abort(abort)) => aborted(&abort, original.id),
                Err(source) => {
                    error!(
                        hook = %HookKind::MessageAcknowledgement,
                        callback = hook.name(),
                        message_id = %original.id,
                        error = %source,
                        "callback.failed"
                    );
                    if first_failure.is_none() {
                        first_failure = Some(source);
                    }
                },
            }
        }
        debug!(message_id = %original.id, "message.acknowledged");
        match first_failure {
            Some(source) => Err(Error::callback(HookKind::MessageAcknowledgement, source)),
            None => Ok(()),
        }
    }
}

fn aborted(abort: &Abort, id: Uuid) {
    debug!(message_id = %id, reason = abort.reason(), "callback.aborted");
}
