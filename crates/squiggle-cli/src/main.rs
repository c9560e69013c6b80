use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use clap::{Parser, Subcommand};
use serde_json::Value;
use squiggle_contracts::chat::{parse_intent, CHAT_HELP_COMMANDS};
use squiggle_contracts::presets::{Preset, PresetStore};
use squiggle_contracts::prompt::InlineImage;
use squiggle_contracts::session::ViewMode;
use squiggle_contracts::settings::{SettingsStore, OPENROUTER_KEY};
use squiggle_engine::{
    fetch_openrouter_models, FrameCapture, NullFrameCapture, StudioEngine, SyntheticFrameCapture,
};

#[derive(Debug, Parser)]
#[command(name = "squiggle", version, about = "Squiggle animation studio CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive studio session.
    Chat(ChatArgs),
    /// One-shot generation, optionally followed by optimization rounds.
    Run(RunArgs),
    /// List the OpenRouter model catalog.
    Models,
}

#[derive(Debug, Parser)]
struct ChatArgs {
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long, default_value = "gemini-3-flash-preview")]
    model: String,
    #[arg(long, default_value = "gemini")]
    provider: String,
    /// Frame source for /optimize: "none" or "synthetic".
    #[arg(long, default_value = "none")]
    frames: String,
}

#[derive(Debug, Parser)]
struct RunArgs {
    #[arg(long)]
    prompt: String,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long, default_value = "husky")]
    preset: String,
    #[arg(long, default_value = "gemini-3-flash-preview")]
    model: String,
    #[arg(long, default_value = "gemini")]
    provider: String,
    /// Optimization rounds to run after the initial generation.
    #[arg(long)]
    rounds: Option<u32>,
    /// Frame source for the loop: "none" or "synthetic".
    #[arg(long, default_value = "none")]
    frames: String,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("squiggle error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Chat(args) => {
            run_chat(args)?;
            Ok(0)
        }
        Command::Run(args) => run_one_shot(args),
        Command::Models => run_models(),
    }
}

fn run_chat(args: ChatArgs) -> Result<()> {
    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.out.join("events.jsonl"));
    let mut engine = StudioEngine::new(&args.out, &events_path, Some(args.model.clone()))?;
    engine.set_provider(&args.provider)?;

    let mut settings = SettingsStore::load(args.out.join("settings.json"));
    engine.set_credential(settings.get(OPENROUTER_KEY));
    let mut presets = PresetStore::load(args.out.join("presets.json"));
    let mut active_preset: Preset = presets.default_preset().clone();
    let mut last_subject: Option<String> = None;
    let mut total_rounds: u32 = 3;
    let capture = frame_capture(&args.frames)?;

    let stdin = io::stdin();
    let mut line = String::new();

    println!("Squiggle chat started. Type /help for commands.");
    println!("Active style: {} ({})", active_preset.name, active_preset.id);

    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let input = line.trim_end_matches(['\n', '\r']);
        let intent = parse_intent(input);

        match intent.action.as_str() {
            "noop" => continue,
            "help" => {
                println!("Commands: {}", CHAT_HELP_COMMANDS.join(" "));
            }
            "quit" => break,
            "generate" => {
                let Some(prompt) = intent.prompt else {
                    continue;
                };
                match engine.generate(&active_preset.prompt, &prompt, None, None) {
                    Ok(code) => {
                        last_subject = Some(prompt);
                        println!("Generated {} bytes of animation markup.", code.len());
                    }
                    Err(err) => println!("Generation failed: {err:#}"),
                }
            }
            "iterate" => {
                let Some(instruction) = intent.prompt else {
                    println!("/iterate requires an instruction");
                    continue;
                };
                if !engine.state().has_artifact() {
                    println!("No animation to iterate on yet.");
                    continue;
                }
                let original = engine.state().current_code.clone();
                match engine.generate(&active_preset.prompt, &instruction, None, Some(original)) {
                    Ok(_) => println!("Iteration applied."),
                    Err(err) => println!("Iteration failed: {err:#}"),
                }
            }
            "screenshot_iterate" => {
                let Some(path_text) = value_as_non_empty_string(intent.command_args.get("path"))
                else {
                    println!("/screenshot requires an image path");
                    continue;
                };
                let Some(subject) = last_subject.clone() else {
                    println!("Generate an animation before iterating on a screenshot.");
                    continue;
                };
                if !engine.state().has_artifact() {
                    println!("No animation to iterate on yet.");
                    continue;
                }
                let path = PathBuf::from(&path_text);
                let bytes = match std::fs::read(&path) {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        println!("Screenshot read failed ({}): {err}", path.display());
                        continue;
                    }
                };
                let visual = InlineImage::new(mime_for_image_path(&path), BASE64.encode(bytes));
                let prompt = format!("{subject} (Improve based on this screenshot)");
                let original = engine.state().current_code.clone();
                match engine.generate(&active_preset.prompt, &prompt, Some(visual), Some(original))
                {
                    Ok(_) => println!("Screenshot iteration applied."),
                    Err(err) => println!("Screenshot iteration failed: {err:#}"),
                }
            }
            "optimize" => {
                let Some(subject) = last_subject.clone() else {
                    println!("Generate an animation before optimizing.");
                    continue;
                };
                let cancel = AtomicBool::new(false);
                match engine.run_optimize_loop(
                    &active_preset.prompt,
                    &subject,
                    total_rounds,
                    capture.as_ref(),
                    &cancel,
                ) {
                    Ok(summary) => {
                        println!(
                            "Optimization finished: {} improved, {} failed.",
                            summary.improved_rounds, summary.failed_rounds
                        );
                        for entry in engine.feedback().entries() {
                            println!("  #{} {}", entry.round, entry.text);
                        }
                    }
                    Err(err) => println!("Optimization failed: {err:#}"),
                }
            }
            "set_loops" => {
                if let Some(value) = intent
                    .settings_update
                    .get("total_rounds")
                    .and_then(Value::as_u64)
                {
                    total_rounds = value as u32;
                    println!("Optimization rounds set to {total_rounds}");
                } else {
                    println!("/loops requires a number between 1 and 10");
                }
            }
            "set_preset" => {
                let Some(id) = value_as_non_empty_string(intent.command_args.get("preset")) else {
                    println!("/preset requires a preset id");
                    continue;
                };
                match presets.get(&id) {
                    Some(preset) => {
                        active_preset = preset.clone();
                        println!("Active style: {} ({})", active_preset.name, active_preset.id);
                    }
                    None => println!("Unknown preset '{id}'. Try /presets."),
                }
            }
            "list_presets" => {
                for preset in presets.list() {
                    let marker = if preset.is_custom { " (custom)" } else { "" };
                    println!("{:<12} {}{} - {}", preset.id, preset.name, marker, preset.description);
                }
            }
            "create_preset" => {
                let Some(name) = value_as_non_empty_string(intent.command_args.get("name")) else {
                    println!("/new_preset requires a style name");
                    continue;
                };
                match engine.create_preset(&name) {
                    Ok(preset) => match presets.add(preset.clone()) {
                        Ok(()) => {
                            active_preset = preset;
                            println!(
                                "Created style '{}' ({})",
                                active_preset.name, active_preset.id
                            );
                        }
                        Err(err) => println!("Preset save failed: {err:#}"),
                    },
                    Err(err) => println!("Preset generation failed: {err:#}"),
                }
            }
            "delete_preset" => {
                let Some(id) = value_as_non_empty_string(intent.command_args.get("preset")) else {
                    println!("/delete_preset requires a preset id");
                    continue;
                };
                match presets.remove(&id) {
                    Ok(()) => {
                        if active_preset.id == id {
                            active_preset = presets.default_preset().clone();
                        }
                        println!("Deleted preset '{id}'");
                    }
                    Err(err) => println!("Delete failed: {err:#}"),
                }
            }
            "set_model" => {
                let current = engine.model().to_string();
                let model = value_as_non_empty_string(intent.command_args.get("model"))
                    .unwrap_or(current);
                engine.set_model(model.clone());
                println!("Model set to {model}");
            }
            "set_provider" => {
                let Some(name) = value_as_non_empty_string(intent.command_args.get("provider"))
                else {
                    println!("Active provider: {}", engine.provider());
                    continue;
                };
                match engine.set_provider(&name) {
                    Ok(()) => println!("Provider set to {name}"),
                    Err(err) => println!("{err:#}"),
                }
            }
            "set_credential" => {
                let Some(credential) =
                    value_as_non_empty_string(intent.command_args.get("credential"))
                else {
                    println!("/key requires a credential");
                    continue;
                };
                if let Err(err) = settings.set(OPENROUTER_KEY, credential.clone()) {
                    println!("Credential save failed: {err:#}");
                    continue;
                }
                engine.set_credential(Some(credential));
                println!("OpenRouter credential saved.");
            }
            "list_models" => match fetch_openrouter_models() {
                Ok(models) => {
                    for model in models {
                        let context = model
                            .context_length
                            .map(|value| value.to_string())
                            .unwrap_or_else(|| "?".to_string());
                        println!("{:<48} {} (ctx {})", model.id, model.name, context);
                    }
                }
                Err(err) => println!("Model catalog fetch failed: {err:#}"),
            },
            "show_code" => {
                engine.set_view_mode(ViewMode::Code);
                if engine.state().has_artifact() {
                    println!("{}", engine.state().current_code);
                } else {
                    println!("No animation generated yet.");
                }
            }
            "save_artifact" => {
                let Some(path_text) = value_as_non_empty_string(intent.command_args.get("path"))
                else {
                    println!("/save requires a destination path");
                    continue;
                };
                if !engine.state().has_artifact() {
                    println!("No animation to save yet.");
                    continue;
                }
                match std::fs::write(&path_text, &engine.state().current_code) {
                    Ok(()) => println!("Saved to {path_text}"),
                    Err(err) => println!("Save failed: {err}"),
                }
            }
            "unknown" => println!("Unknown command. Type /help for commands."),
            _ => {}
        }
    }

    Ok(())
}

fn run_one_shot(args: RunArgs) -> Result<i32> {
    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.out.join("events.jsonl"));
    let mut engine = StudioEngine::new(&args.out, &events_path, Some(args.model.clone()))?;
    engine.set_provider(&args.provider)?;

    let settings = SettingsStore::load(args.out.join("settings.json"));
    engine.set_credential(settings.get(OPENROUTER_KEY));

    let presets = PresetStore::load(args.out.join("presets.json"));
    let Some(preset) = presets.get(&args.preset).cloned() else {
        bail!("unknown preset '{}'", args.preset);
    };

    let code = engine
        .generate(&preset.prompt, &args.prompt, None, None)
        .context("initial generation failed")?;
    println!(
        "Generated {} bytes of animation markup into {}",
        code.len(),
        args.out.display()
    );

    if let Some(rounds) = args.rounds {
        let capture = frame_capture(&args.frames)?;
        let cancel = AtomicBool::new(false);
        let summary = engine.run_optimize_loop(
            &preset.prompt,
            &args.prompt,
            rounds,
            capture.as_ref(),
            &cancel,
        )?;
        println!(
            "Optimization finished: {} improved, {} failed.",
            summary.improved_rounds, summary.failed_rounds
        );
        for entry in engine.feedback().entries() {
            println!("  #{} {}", entry.round, entry.text);
        }
    }

    Ok(0)
}

fn run_models() -> Result<i32> {
    let models = fetch_openrouter_models()?;
    for model in models {
        let context = model
            .context_length
            .map(|value| value.to_string())
            .unwrap_or_else(|| "?".to_string());
        println!("{:<48} {} (ctx {})", model.id, model.name, context);
    }
    Ok(0)
}

fn frame_capture(kind: &str) -> Result<Box<dyn FrameCapture>> {
    match kind {
        "none" => Ok(Box::new(NullFrameCapture)),
        "synthetic" => Ok(Box::new(SyntheticFrameCapture::default())),
        other => bail!("unknown frame source '{other}' (expected none or synthetic)"),
    }
}

fn value_as_non_empty_string(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

fn mime_for_image_path(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "image/png",
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{frame_capture, mime_for_image_path, value_as_non_empty_string};
    use serde_json::Value;

    #[test]
    fn frame_capture_kinds() {
        assert!(frame_capture("none").is_ok());
        assert!(frame_capture("synthetic").is_ok());
        assert!(frame_capture("webcam").is_err());
    }

    #[test]
    fn mime_inference_by_extension() {
        assert_eq!(mime_for_image_path(Path::new("shot.jpg")), "image/jpeg");
        assert_eq!(mime_for_image_path(Path::new("shot.JPEG")), "image/jpeg");
        assert_eq!(mime_for_image_path(Path::new("shot.webp")), "image/webp");
        assert_eq!(mime_for_image_path(Path::new("shot")), "image/png");
    }

    #[test]
    fn non_empty_string_extraction() {
        assert_eq!(
            value_as_non_empty_string(Some(&Value::String("  neon ".to_string()))),
            Some("neon".to_string())
        );
        assert_eq!(
            value_as_non_empty_string(Some(&Value::String("   ".to_string()))),
            None
        );
        assert_eq!(value_as_non_empty_string(None), None);
    }
}
