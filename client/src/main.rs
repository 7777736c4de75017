use clap::Parser;
use log::{info, warn};
use presence_client::{PresenceSession, SyncConfig};
use presence_relay::{LoopbackRelay, NetworkConditions};
use presence_shared::{get_timestamp, AnimationState, Euler, Vector3};
use rand::Rng;
use std::time::Duration;
use tokio::time::interval;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of simulated participants
    #[arg(short = 'b', long, default_value = "3")]
    bots: usize,

    /// How long to run, in seconds
    #[arg(short = 'd', long, default_value = "10")]
    duration: u64,

    /// Probability of losing an unreliable packet
    #[arg(long, default_value = "0.0")]
    drop_rate: f64,

    /// Maximum random delay on unreliable packets in milliseconds
    #[arg(short = 'j', long, default_value = "0")]
    jitter: u64,

    /// Seed for the relay's loss simulation
    #[arg(long)]
    seed: Option<u64>,

    /// JSON file with sync settings
    #[arg(short = 'c', long)]
    config: Option<String>,
}

struct Bot {
    session: PresenceSession,
    phase: f32,
    radius: f32,
}

impl Bot {
    fn step(&mut self, elapsed_secs: f32) {
        let angle = self.phase + elapsed_secs * 0.5;
        let position = Vector3::new(angle.cos() * self.radius, 0.0, angle.sin() * self.radius);
        self.session.set_position(position);
        self.session.set_rotation(Euler::new(0.0, -angle, 0.0));
        self.session.set_is_running(elapsed_secs as u64 % 6 >= 3);
        let animation = if self.session.local_state().is_running {
            AnimationState::Forward
        } else {
            AnimationState::ForwardLeft
        };
        self.session.set_animation(animation);
        self.session.tick();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => SyncConfig::from_json(&std::fs::read_to_string(path)?)?,
        None => SyncConfig::default(),
    };

    let mut conditions = NetworkConditions::lossy(args.drop_rate, args.jitter);
    if let Some(seed) = args.seed {
        conditions = conditions.with_seed(seed);
    }

    info!("Starting {} bots for {}s", args.bots, args.duration);
    if args.drop_rate > 0.0 || args.jitter > 0 {
        info!(
            "Simulating {:.0}% loss and up to {}ms jitter",
            args.drop_rate * 100.0,
            args.jitter
        );
    }

    let relay = LoopbackRelay::new(conditions);
    let mut rng = rand::thread_rng();
    let mut bots = Vec::with_capacity(args.bots);
    let mut transports = Vec::with_capacity(args.bots);

    for index in 0..args.bots {
        let (transport, events) = relay.connect()?;
        let session = PresenceSession::new(transport.clone(), config.clone())?;
        let runner = session.clone();
        tokio::spawn(async move { runner.run(events).await });

        session.set_username(&format!("Bot {}", index + 1)).await;
        bots.push(Bot {
            session,
            phase: rng.gen_range(0.0..std::f32::consts::TAU),
            radius: rng.gen_range(2.0..8.0),
        });
        transports.push(transport);
    }

    let started = get_timestamp();
    let deadline = tokio::time::sleep(Duration::from_secs(args.duration));
    tokio::pin!(deadline);

    let mut frame = interval(Duration::from_millis(16));
    let mut report = interval(Duration::from_secs(1));
    let mut chatter = interval(Duration::from_secs(3));

    loop {
        tokio::select! {
            _ = frame.tick() => {
                let elapsed = get_timestamp().saturating_sub(started) as f32 / 1000.0;
                for bot in &mut bots {
                    bot.step(elapsed);
                }
            },

            _ = chatter.tick() => {
                if bots.is_empty() {
                    continue;
                }
                let speaker = rng.gen_range(0..bots.len());
                let session = &bots[speaker].session;
                session.send_typing(true);
                let text = format!("hello from {}", session.local_state().username);
                if let Err(e) = session.send_chat_message(&text, None).await {
                    warn!("Chat failed: {}", e);
                }
            },

            _ = report.tick() => {
                if let Some(observer) = bots.first() {
                    let now = get_timestamp();
                    for player in observer.session.render_players(now) {
                        info!(
                            "{} sees {} at ({:.2}, {:.2}) {:?}{}",
                            observer.session.local_state().username,
                            player.username,
                            player.position.x,
                            player.position.z,
                            player.animation_state,
                            if player.is_running { " running" } else { "" }
                        );
                    }
                    info!("{} chat messages", observer.session.chat_messages().len());
                }
            },

            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            },

            _ = &mut deadline => break,
        }
    }

    for transport in &transports {
        transport.disconnect();
    }
    info!("Relay has {} peers left", relay.peer_count());

    Ok(())
}
