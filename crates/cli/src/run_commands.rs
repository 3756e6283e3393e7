use std::path::PathBuf;

use {
    anyhow::{Context, Result},
    clap::Args,
    doozer::{Application, Consumer, LinesConsumer, Settings},
    tokio::io::{AsyncRead, BufReader},
};

#[derive(Args)]
pub struct RunArgs {
    /// Newline-delimited JSON input; stdin when omitted.
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Number of workers, which is also the queue capacity.
    #[arg(short, long, default_value_t = 1)]
    workers: usize,

    /// Raise log verbosity to debug once the application has started.
    #[arg(long)]
    debug: bool,
}

pub fn handle_run(args: RunArgs, settings: Settings) -> Result<()> {
    let reader: Box<dyn AsyncRead + Unpin + Send> = match &args.input {
        Some(path) => {
            let file = std::fs::File::open(path)
                .with_context(|| format!("failed to open {}", path.display()))?;
            Box::new(tokio::fs::File::from_std(file))
        },
        None => Box::new(tokio::io::stdin()),
    };

    let mut app = echo_app(settings, LinesConsumer::new(BufReader::new(reader)));
    app.run(args.workers, args.debug)?;
    Ok(())
}

/// An application that prints each message's payload to stdout.
fn echo_app(settings: Settings, consumer: impl Consumer + 'static) -> Application {
    let mut app = Application::with_settings("doozer", settings).with_consumer(consumer);
    app.processor_fn(|_, message| {
        let payload = message.payload.clone();
        Box::pin(async move { Ok(vec![payload]) })
    });
    app.result_postprocessor(|_, result| {
        println!("{result}");
        Box::pin(async move { Ok(result) })
    });
    app
}
