//! Image Classification Example
//!
//! Validates an image file the way an upload would be validated, then
//! classifies it once and prints the ranked labels.
//!
//! The classifier here is a stand-in that reports fixed scores, so the example
//! exercises validation, decoding and result handling without a model.
//!
//! Usage:
//!   cargo run --example classify_image -- --image <path_to_image> [--debug]

use clap::Parser;
use std::error::Error;
use std::sync::Arc;
use vision_session::backends::scripted::StaticClassifier;
use vision_session::{
    ImageClassifier, LabeledScore, Loaded, RunOutcome, SessionConfig, UploadSession, UploadedFile,
};

/// Command line parameters for the image classification example
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the image file to classify
    #[arg(short, long)]
    image: String,

    /// Enable debug output
    #[arg(short, long, default_value_t = false)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    if args.debug {
        std::env::set_var("RUST_LOG", "debug");
    }
    env_logger::init();

    let model: Arc<dyn ImageClassifier> = Arc::new(StaticClassifier::new(vec![
        LabeledScore::new("cat", 0.87),
        LabeledScore::new("dog", 0.10),
        LabeledScore::new("fox", 0.03),
    ]));
    let session = UploadSession::new(Arc::new(Loaded::classifier(model)), &SessionConfig::default());

    let file = UploadedFile::from_path(&args.image)?;
    if args.debug {
        println!("Selected {:?}", file);
    }
    if let Err(e) = session.select_file(file) {
        println!("Rejected: {}", e.message);
        return Ok(());
    }

    match session.classify().await {
        Ok(RunOutcome::Ranked(_)) => {
            for line in session.state().result_lines() {
                println!("{}", line);
            }
        }
        Ok(RunOutcome::Ignored) => println!("Nothing to classify"),
        Err(e) => println!("Classification failed: {}", e.message),
    }

    Ok(())
}
