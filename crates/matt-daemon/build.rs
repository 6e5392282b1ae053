//! Build script: render the Matt_daemon section 8 manual page into OUT_DIR.

use std::{env, fs, path::PathBuf};

use time::{OffsetDateTime, format_description::well_known::Iso8601};

const FALLBACK_DATE: &str = "1970-01-01";

/// Reproducible builds pin the page date through `SOURCE_DATE_EPOCH`.
fn manual_date() -> String {
    let Ok(raw) = env::var("SOURCE_DATE_EPOCH") else {
        return FALLBACK_DATE.into();
    };
    let formatted = raw
        .parse::<i64>()
        .ok()
        .and_then(|seconds| OffsetDateTime::from_unix_timestamp(seconds).ok())
        .and_then(|moment| moment.format(&Iso8601::DATE).ok());
    formatted.unwrap_or_else(|| {
        println!("cargo:warning=Ignoring invalid SOURCE_DATE_EPOCH '{raw}'");
        FALLBACK_DATE.into()
    })
}

fn render(binary_name: &str, version: &str, date: &str) -> String {
    let title = binary_name.to_uppercase();
    format!(
        ".TH \"{title}\" \"8\" \"{date}\" \"{binary_name} {version}\" \"System Administration\"\n\
.SH NAME\n\
{binary_name} \\- single-instance control daemon\n\
.SH SYNOPSIS\n\
.B {binary_name}\n\
[\\fB\\-\\-listen\\-port\\fR \\fIPORT\\fR]\n\
[\\fB\\-\\-lock\\-path\\fR \\fIPATH\\fR]\n\
[\\fB\\-\\-log\\-path\\fR \\fIPATH\\fR]\n\
.SH DESCRIPTION\n\
{binary_name} must run as root. It claims a lock file, detaches from the\n\
terminal and journals every line received on its TCP control port, serving\n\
at most three clients at once. Sending \\fBquit\\fR, or delivering SIGTERM,\n\
SIGINT, SIGQUIT or SIGHUP, stops the daemon and removes the lock file.\n\
.SH ENVIRONMENT\n\
.TP\n\
.B MATT_DAEMON_FOREGROUND\n\
Stay attached to the terminal instead of detaching.\n\
.TP\n\
.B MATT_DAEMON_LISTEN_PORT\n\
Overrides the control port; every option has a MATT_DAEMON_ variable.\n\
.SH FILES\n\
.TP\n\
.I /var/lock/matt_daemon.lock\n\
Holds the pid of the running instance.\n\
.TP\n\
.I /var/log/matt_daemon.log\n\
Timestamped journal of client messages and lifecycle events.\n"
    )
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");

    let binary_name = env::var("CARGO_BIN_NAME").unwrap_or_else(|_| "Matt_daemon".into());
    let version = env::var("CARGO_PKG_VERSION")?;
    let out_dir = PathBuf::from(env::var_os("OUT_DIR").ok_or("OUT_DIR is not set")?);

    let page = render(&binary_name, &version, &manual_date());
    fs::write(out_dir.join(format!("{binary_name}.8")), page)?;
    Ok(())
}
