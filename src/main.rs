use clap::{Args, Parser, Subcommand};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use rider_realtime::{
    AppConfig, AppState, ControllerEvent, RideScreen, RideStatus, RiderError, RiderResult,
    models::{ride::RideRequest, user::RegisterRequest},
    services::ride_service::RideApi,
};

#[derive(Parser, Debug)]
#[command(
    name = "hfc-rider",
    about = "Request, track and manage bike rides from the terminal",
    version
)]
struct Cli {
    #[arg(
        long,
        global = true,
        help = "Print tracking screens as JSON lines instead of text"
    )]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send a one-time code to your phone
    Login {
        #[arg(long, value_name = "PHONE")]
        phone: String,
    },
    /// Finish logging in with the code you received
    Verify {
        #[arg(long, value_name = "PHONE")]
        phone: String,
        #[arg(long, value_name = "CODE")]
        otp: String,
    },
    /// Create a rider account
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long, value_name = "PHONE")]
        phone: String,
    },
    /// Show your profile
    Me,
    /// Forget the stored session
    Logout,
    /// Request a ride
    Request(RequestArgs),
    /// List past and current rides
    History {
        #[arg(long, value_name = "STATUS", help = "Only rides with this status (e.g. COMPLETED)")]
        status: Option<String>,
    },
    /// Follow a ride live until it finishes
    Track {
        #[arg(value_name = "RIDE_ID")]
        ride_id: String,
    },
    /// Cancel a ride that has not been picked up yet
    Cancel {
        #[arg(value_name = "RIDE_ID")]
        ride_id: String,
        #[arg(long, default_value = "", help = "Reason shown to the driver")]
        reason: String,
    },
    /// Get a link others can use to follow the ride
    Share {
        #[arg(value_name = "RIDE_ID")]
        ride_id: String,
    },
    /// Raise an emergency alert for the ride
    Sos {
        #[arg(value_name = "RIDE_ID")]
        ride_id: String,
    },
}

#[derive(Args, Debug)]
struct RequestArgs {
    #[arg(long, value_name = "ADDRESS")]
    pickup: String,
    #[arg(long, value_name = "ADDRESS")]
    dropoff: String,
    #[arg(long, allow_negative_numbers = true)]
    pickup_lat: Option<f64>,
    #[arg(long, allow_negative_numbers = true)]
    pickup_lng: Option<f64>,
    #[arg(long, allow_negative_numbers = true)]
    dropoff_lat: Option<f64>,
    #[arg(long, allow_negative_numbers = true)]
    dropoff_lng: Option<f64>,
    #[arg(long)]
    notes: Option<String>,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rider_realtime=info,hfc_rider=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    let state = match AppConfig::from_env()
        .map_err(RiderError::from)
        .and_then(AppState::new)
    {
        Ok(state) => state,
        Err(err) => {
            eprintln!("{}", err);
            return ExitCode::FAILURE;
        }
    };

    match run(&state, cli).await {
        Ok(code) => code,
        Err(err) => {
            tracing::debug!("Command failed: {}", err);
            eprintln!("{}", err.user_message());
            ExitCode::FAILURE
        }
    }
}

async fn run(state: &AppState, cli: Cli) -> RiderResult<ExitCode> {
    match cli.command {
        Command::Login { phone } => {
            let message = state.auth_service.request_otp(&phone).await?;
            println!("{}", if message.is_empty() { "Code sent." } else { message.as_str() });
        }
        Command::Verify { phone, otp } => {
            let user = state.auth_service.verify_otp(&phone, &otp).await?;
            println!("Welcome, {}.", user.full_name);
        }
        Command::Register { name, email, phone } => {
            let request = RegisterRequest { full_name: name, email, phone_number: phone };
            let response = state.auth_service.register(&request).await?;
            println!("Account created for {}. Log in with `hfc-rider login --phone {}`.", response.user.full_name, response.user.phone_number);
        }
        Command::Me => {
            let user = state.auth_service.current_user().await?;
            println!("{} <{}> {}", user.full_name, user.email, user.phone_number);
        }
        Command::Logout => {
            state.auth_service.logout().await?;
            println!("Logged out.");
        }
        command => {
            if !state.auth_service.is_authenticated() {
                return Err(RiderError::NotAuthenticated);
            }
            return run_ride_command(state, command, cli.json).await;
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_ride_command(state: &AppState, command: Command, json: bool) -> RiderResult<ExitCode> {
    let rides = &state.ride_service;
    match command {
        Command::Request(args) => {
            let request = RideRequest {
                pickup_address: args.pickup,
                pickup_lat: args.pickup_lat,
                pickup_lng: args.pickup_lng,
                dropoff_address: args.dropoff,
                dropoff_lat: args.dropoff_lat,
                dropoff_lng: args.dropoff_lng,
                rider_notes: args.notes,
            };
            let response = rides.request_ride(&request).await?;
            println!("Ride {} requested ({}).", response.ride.id, response.ride.fare_display());
            println!("Follow it with `hfc-rider track {}`.", response.ride.id);
        }
        Command::History { status } => {
            let status = status.map(|s| s.parse::<RideStatus>()).transpose()?;
            let page = rides.history(status).await?;
            println!("{} ride(s)", page.count);
            for ride in page.results {
                let created = ride
                    .created_at
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_default();
                println!(
                    "{}  {:<11}  {} -> {}  {}  {}",
                    ride.id,
                    ride.status.as_str(),
                    ride.pickup_address,
                    ride.dropoff_address,
                    ride.fare_display(),
                    created
                );
            }
        }
        Command::Track { ride_id } => return Ok(track(state, &ride_id, json).await),
        Command::Cancel { ride_id, reason } => {
            let ride = rides.cancel_ride(&ride_id, &reason).await?;
            println!("Ride {} is now {}.", ride.id, ride.status);
        }
        Command::Share { ride_id } => {
            let url = rides.share_ride(&ride_id).await?;
            println!("{}", url);
        }
        Command::Sos { ride_id } => {
            let ack = rides.send_sos(&ride_id).await?;
            println!("{}", ack);
        }
        Command::Login { .. }
        | Command::Verify { .. }
        | Command::Register { .. }
        | Command::Me
        | Command::Logout => {}
    }
    Ok(ExitCode::SUCCESS)
}

fn render(screen: &RideScreen, json: bool) {
    if json {
        match serde_json::to_string(screen) {
            Ok(line) => println!("{}", line),
            Err(err) => tracing::warn!("Could not serialize screen: {}", err),
        }
    } else {
        println!("{}\n", screen);
    }
}

/// Runs the tracking screen until it redirects, goes idle or is interrupted.
async fn track(state: &AppState, ride_id: &str, json: bool) -> ExitCode {
    let mut controller = state.ride_view_controller();
    controller.initialize(ride_id).await;
    render(&controller.screen(), json);

    let code = if controller.view().load_error.is_some() {
        ExitCode::FAILURE
    } else {
        loop {
            tokio::select! {
                event = controller.next_event() => match event {
                    Some(ControllerEvent::Updated) => render(&controller.screen(), json),
                    Some(ControllerEvent::Redirect(route)) => {
                        tracing::info!("Redirecting to {:?}", route);
                        println!("Returning to dashboard.");
                        break ExitCode::SUCCESS;
                    }
                    None => {
                        let view = controller.view();
                        if !view.is_terminal() && view.connection.is_final() {
                            println!("Live updates stopped. Run `hfc-rider track {}` to retry.", ride_id);
                        }
                        break ExitCode::SUCCESS;
                    }
                },
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Interrupted");
                    break ExitCode::SUCCESS;
                }
            }
        }
    };

    controller.teardown();
    code
}
