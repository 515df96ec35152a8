use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use senselink_lib::io::serial::list_serial_ports;
use senselink_lib::{
    load_settings, tlog, DeviceLink, DeviceTools, LinkError, LogRing, PacketObserver,
};

/// Serial console for the sensor board: streams telemetry and sends commands.
#[derive(Parser, Debug)]
#[command(name = "senselink", version, about)]
struct Args {
    /// Serial port (overrides the settings file)
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate (overrides the settings file)
    #[arg(short, long)]
    baud: Option<u32>,

    /// Settings file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// List available serial ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Skip the red/yellow/off startup blink
    #[arg(long)]
    no_blink: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    if args.list_ports {
        return match list_serial_ports() {
            Ok(ports) => {
                for port in ports {
                    println!("{}", port.row());
                }
                ExitCode::SUCCESS
            }
            Err(e) => {
                tlog!("[main] {}", e);
                ExitCode::FAILURE
            }
        };
    }

    let mut settings = match load_settings(args.config.as_deref()) {
        Ok(s) => s,
        Err(e) => {
            tlog!("[main] {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(port) = args.port {
        settings.port = port;
    }
    if let Some(baud) = args.baud {
        settings.baud_rate = baud;
    }

    let log = Arc::new(LogRing::new(settings.log_capacity));
    let observer: Arc<dyn PacketObserver> = log.clone();
    tlog!("[main] Initializing connection on {}...", settings.port);
    let link = match DeviceLink::open(&settings.serial_config(), Some(observer)) {
        Ok(link) => Arc::new(link),
        Err(e) => {
            tlog!(
                "[main] Could not connect on {}: {}. Check the port and connection.",
                settings.port,
                e
            );
            return ExitCode::FAILURE;
        }
    };

    if !args.no_blink {
        if let Err(e) = startup_blink(&link) {
            tlog!("[main] Startup blink failed: {}", e);
        }
    }
    tlog!(
        "[main] Connected to {}. Type 'help' for commands.",
        link.port_name()
    );

    let tools = DeviceTools::new(link.clone(), log, settings.state_timeout());
    run_console(&tools);

    tlog!("[main] Shutting down...");
    link.close();
    ExitCode::SUCCESS
}

fn startup_blink(link: &DeviceLink) -> Result<(), LinkError> {
    link.red_led()?;
    std::thread::sleep(Duration::from_millis(500));
    link.yellow_led()?;
    std::thread::sleep(Duration::from_millis(500));
    link.led_off()
}

const HELP: &str = "\
commands:
  goto <x> <y> <z>   set target position (metres)
  rgb <r> <g> <b>    set LED colour (0-255)
  led on|off         builtin LED
  red | yellow | green | off
  temp | humidity | position
  logs [n]           recent device log lines
  quit";

fn run_console(tools: &DeviceTools) {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else {
            break;
        };
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some((&cmd, rest)) = words.split_first() else {
            continue;
        };

        match dispatch(tools, cmd, rest) {
            Ok(Reply::Quit) => break,
            Ok(Reply::Text(text)) => println!("{}", text),
            Err(e) => println!("error: {}", e),
        }
    }
}

enum Reply {
    Text(String),
    Quit,
}

fn dispatch(tools: &DeviceTools, cmd: &str, rest: &[&str]) -> Result<Reply, String> {
    let link = tools.link();
    let text = match cmd {
        "goto" => {
            let [x, y, z] = numbers::<f64, 3>(rest)?;
            tools.goto_target(x, y, z).map_err(|e| e.to_string())?
        }
        "rgb" => {
            let [r, g, b] = numbers::<i32, 3>(rest)?;
            link.send_rgb(r, g, b).map_err(|e| e.to_string())?;
            format!("RGB set to {},{},{}", r, g, b)
        }
        "led" => {
            let on = match rest.first().copied() {
                Some("on") => true,
                Some("off") => false,
                _ => return Err("usage: led on|off".to_string()),
            };
            link.send_led(on).map_err(|e| e.to_string())?;
            format!("LED {}", if on { "on" } else { "off" })
        }
        "red" | "yellow" | "green" | "off" => {
            let sent = match cmd {
                "red" => link.red_led(),
                "yellow" => link.yellow_led(),
                "green" => link.green_led(),
                _ => link.led_off(),
            };
            sent.map_err(|e| e.to_string())?;
            format!("LED colour {}", cmd)
        }
        "temp" => tools.current_temperature(),
        "humidity" => tools.current_humidity(),
        "position" => tools.current_position(),
        "logs" => {
            let limit = match rest.first() {
                Some(n) => n.parse::<usize>().map_err(|_| format!("bad count: {}", n))?,
                None => 20,
            };
            tools.recent_logs(limit).join("\n")
        }
        "help" => HELP.to_string(),
        "quit" | "exit" => return Ok(Reply::Quit),
        other => return Err(format!("unknown command '{}' (try 'help')", other)),
    };
    Ok(Reply::Text(text))
}

fn numbers<T: std::str::FromStr, const N: usize>(args: &[&str]) -> Result<[T; N], String> {
    if args.len() != N {
        return Err(format!("expected {} numbers, got {}", N, args.len()));
    }
    let parsed: Vec<T> = args
        .iter()
        .map(|a| a.parse().map_err(|_| format!("not a number: {}", a)))
        .collect::<Result<_, _>>()?;
    parsed
        .try_into()
        .map_err(|_| format!("expected {} numbers", N))
}
