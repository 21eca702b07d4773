//! Session orchestration: camera warm-up, registration capture, the
//! timeout-bounded login search, and team recognition.
//!
//! Everything here is synchronous and blocking; the camera handle is owned
//! by one operation at a time and released when it drops, on every exit
//! path.

use crate::config::Config;
use anyhow::{bail, Context, Result};
use facegate_core::gallery::{Gallery, GalleryError};
use facegate_core::matcher::recognize;
use facegate_core::oracle::OnnxOracle;
use facegate_core::{store, FaceOracle};
use facegate_hw::{Camera, Frame};
use image::RgbImage;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Ctrl-C flag, checked once per capture-loop iteration.
pub type QuitSignal = Arc<AtomicBool>;

pub fn install_quit_signal() -> Result<QuitSignal> {
    let quit = Arc::new(AtomicBool::new(false));
    let handle = quit.clone();
    ctrlc::set_handler(move || handle.store(true, Ordering::SeqCst))
        .context("failed to install Ctrl-C handler")?;
    Ok(quit)
}

fn quit_requested(quit: &QuitSignal) -> bool {
    quit.load(Ordering::SeqCst)
}

/// Outcome of a login attempt. Timing out is a normal negative result, not
/// an error.
#[derive(Debug, PartialEq, Eq)]
pub enum LoginOutcome {
    Recognized,
    NotRecognized,
    Cancelled,
}

/// Capture registration photos for `username` and write them to the photo
/// store.
pub fn run_register(cfg: &Config, username: &str, overwrite: bool, quit: &QuitSignal) -> Result<()> {
    let name = store::validate_username(username)?;

    if store::user_exists(&cfg.faces_dir, name) {
        if !overwrite {
            bail!("user '{name}' is already registered; pass --overwrite to replace their photos");
        }
        store::remove_user(&cfg.faces_dir, name)?;
        tracing::info!(user = name, "removed existing registration");
    }

    let camera = Camera::open(&cfg.camera_device)?;
    camera.warm_up(cfg.warmup_attempts, cfg.warmup_settle(), cfg.black_threshold)?;
    println!("Camera ready; capturing {} photos...", store::PHOTOS_PER_USER);

    let mut frames: Vec<RgbImage> = Vec::with_capacity(store::PHOTOS_PER_USER);
    let mut attempts = 0usize;

    while frames.len() < store::PHOTOS_PER_USER {
        if quit_requested(quit) {
            bail!("registration cancelled");
        }
        if attempts >= cfg.capture_retries {
            bail!(
                "camera kept returning black frames; captured {} of {} photos",
                frames.len(),
                store::PHOTOS_PER_USER
            );
        }

        let frame = camera.capture_frame()?;
        attempts += 1;

        if frame.is_black(cfg.black_threshold) {
            tracing::warn!(attempts, "frame still black, camera adjusting");
            std::thread::sleep(cfg.poll_interval());
            continue;
        }

        frames.push(to_image(&frame));
        attempts = 0;
        println!("  captured photo {}/{}", frames.len(), store::PHOTOS_PER_USER);
        if frames.len() < store::PHOTOS_PER_USER {
            std::thread::sleep(cfg.shot_interval());
        }
    }

    let saved = store::save_photos(&cfg.faces_dir, name, &frames)?;
    println!("Registered '{name}' with {} photos.", saved.len());
    Ok(())
}

/// Search live frames for `username` until matched, timed out, or
/// cancelled. The gallery is rebuilt from disk for every call, so photos
/// registered moments ago are already in play.
pub fn run_login(cfg: &Config, username: &str, quit: &QuitSignal) -> Result<LoginOutcome> {
    let name = store::validate_username(username)?;

    let mut oracle = load_oracle(cfg)?;
    let gallery = build_gallery(cfg, &mut oracle)?;
    if gallery.is_empty() {
        bail!("no usable face photos found; run `facegate register` first");
    }
    if !gallery.owners().contains(name) {
        tracing::warn!(user = name, "user has no gallery entries; login will not succeed");
    }

    let camera = Camera::open(&cfg.camera_device)?;
    camera.warm_up(cfg.warmup_attempts, cfg.warmup_settle(), cfg.black_threshold)?;
    println!("Please look at the camera...");

    let settings = cfg.match_settings();
    let started = Instant::now();

    while started.elapsed() < cfg.login_timeout() {
        if quit_requested(quit) {
            return Ok(LoginOutcome::Cancelled);
        }

        let frame = camera.capture_frame()?;
        if frame.is_black(cfg.black_threshold) {
            std::thread::sleep(cfg.poll_interval());
            continue;
        }

        let faces = recognize(
            &mut oracle,
            &frame.data,
            frame.width,
            frame.height,
            &gallery,
            &settings,
        )?;

        for face in &faces {
            tracing::debug!(
                label = face.label(),
                distance = face.distance,
                "face in frame"
            );
            if face.name.as_deref() == Some(name) {
                tracing::info!(
                    user = name,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "user recognized"
                );
                return Ok(LoginOutcome::Recognized);
            }
        }
    }

    Ok(LoginOutcome::NotRecognized)
}

/// Label every face the camera sees and collect recognized owners until
/// cancelled or `duration_secs` elapses. Returns the sorted set of names.
pub fn run_team_recognition(
    cfg: &Config,
    duration_secs: Option<u64>,
    quit: &QuitSignal,
) -> Result<BTreeSet<String>> {
    let mut oracle = load_oracle(cfg)?;
    let gallery = build_gallery(cfg, &mut oracle)?;
    if gallery.is_empty() {
        bail!("no team members registered yet; run `facegate register` first");
    }

    let camera = Camera::open(&cfg.camera_device)?;
    camera.warm_up(cfg.warmup_attempts, cfg.warmup_settle(), cfg.black_threshold)?;
    println!("Watching for team members (Ctrl-C to stop)...");

    let settings = cfg.match_settings();
    let started = Instant::now();
    let mut recognized: BTreeSet<String> = BTreeSet::new();

    loop {
        if quit_requested(quit) {
            break;
        }
        if let Some(secs) = duration_secs {
            if started.elapsed().as_secs() >= secs {
                break;
            }
        }

        let frame = camera.capture_frame()?;
        if frame.is_black(cfg.black_threshold) {
            std::thread::sleep(cfg.poll_interval());
            continue;
        }

        let faces = recognize(
            &mut oracle,
            &frame.data,
            frame.width,
            frame.height,
            &gallery,
            &settings,
        )?;

        for face in faces {
            if let Some(name) = face.name {
                if recognized.insert(name.clone()) {
                    println!("  recognized: {name}");
                }
            }
        }
    }

    Ok(recognized)
}

/// Camera and gallery diagnostics for `facegate test`.
pub fn run_test(cfg: &Config) -> Result<()> {
    println!("Capture devices:");
    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("  (none found)");
    }
    for dev in &devices {
        println!("  {} — {} ({})", dev.path, dev.name, dev.driver);
    }

    println!("Opening {}...", cfg.camera_device);
    let camera = Camera::open(&cfg.camera_device)?;
    let frame = camera.warm_up(cfg.warmup_attempts, cfg.warmup_settle(), cfg.black_threshold)?;
    println!(
        "  ok: {}x{}, mean brightness {:.1}",
        frame.width,
        frame.height,
        frame.mean_intensity()
    );

    match store::list_users(&cfg.faces_dir) {
        Ok(users) if users.is_empty() => println!("No users registered in {}.", cfg.faces_dir.display()),
        Ok(users) => println!("Registered users: {}", users.join(", ")),
        Err(err) => println!("Could not read photo store: {err}"),
    }

    Ok(())
}

fn load_oracle(cfg: &Config) -> Result<OnnxOracle> {
    OnnxOracle::load(&cfg.model_dir).with_context(|| {
        format!(
            "failed to load face models from {} (expected det_10g.onnx and w600k_r50.onnx)",
            cfg.model_dir.display()
        )
    })
}

fn build_gallery(cfg: &Config, oracle: &mut dyn FaceOracle) -> Result<Gallery> {
    match Gallery::build(&cfg.faces_dir, oracle) {
        Ok(gallery) => Ok(gallery),
        Err(GalleryError::RootNotFound(_)) => {
            bail!("no registered faces found; run `facegate register` first")
        }
        Err(err) => Err(err.into()),
    }
}

fn to_image(frame: &Frame) -> RgbImage {
    RgbImage::from_raw(frame.width, frame.height, frame.data.clone())
        .unwrap_or_else(|| RgbImage::new(frame.width, frame.height))
}
