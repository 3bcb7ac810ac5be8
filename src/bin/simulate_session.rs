use std::env;
use std::sync::Arc;
use xr_frame_pacer::vr::{SessionState, SimulatedRuntime, XrRuntime};
use xr_frame_pacer::{NullEyeRenderer, SessionConfig, StereoRenderer, XrPlatform};

const DEFAULT_FRAMES: u64 = 90;

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("[simulate] error: {err}");
        std::process::exit(1);
    }
}

/// Usage: `simulate_session [frames] [config.json]`
fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = env::args().skip(1);
    let frames = match args.next() {
        Some(arg) => arg.parse::<u64>()?,
        None => DEFAULT_FRAMES,
    };
    let config = match args.next() {
        Some(path) => SessionConfig::from_path(path)?,
        None => SessionConfig::default(),
    };

    let runtime = Arc::new(SimulatedRuntime::new());
    let platform = XrPlatform::initialize(runtime.clone(), config)?;
    // The simulated host renders on whatever device the runtime asks for.
    platform.verify_device(runtime.graphics_device()?)?;

    let session = platform.create_session()?;
    for state in [SessionState::Idle, SessionState::Ready, SessionState::Focused] {
        runtime.push_state(state);
    }
    platform.poll_events()?;

    let renderer = StereoRenderer::new(session.clone(), Arc::new(NullEyeRenderer::default()));
    for _ in 0..frames {
        platform.poll_events()?;
        if session.should_close() {
            break;
        }
        if let Err(err) = renderer.render_frame() {
            log::warn!("[simulate] frame failed: {err}");
        }
        session.poll_actions()?;
    }

    session.request_close()?;
    while !session.should_close() {
        platform.poll_events()?;
    }

    let stats = session.stats();
    platform.destroy_session(session)?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

