//! Process-fatal error handling.

use std::any::Any;
use std::backtrace::Backtrace;
use std::time::Duration;

use log::error;

/// Time given to the logger to flush before exiting.
const EXIT_DELAY: Duration = Duration::from_millis(100);

/// Log any panic and exit the process with status 1.
pub fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown location".to_string());
        let backtrace = Backtrace::force_capture();
        error!(
            target: "debug_relay::fatal",
            "{}",
            fatal_report(&location, &panic_message(info.payload()), &backtrace)
        );
        std::thread::sleep(EXIT_DELAY);
        std::process::exit(1);
    }));
}

/// Log line for a panic, with the stack that led to it.
fn fatal_report(location: &str, message: &str, backtrace: &Backtrace) -> String {
    format!("Fatal error at {}: {}\n{}", location, message, backtrace)
}

/// Text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_message_reads_str_and_string_payloads() {
        let literal: Box<dyn Any + Send> = Box::new("static message");
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned message"));
        let other: Box<dyn Any + Send> = Box::new(42u8);

        assert_eq!(panic_message(literal.as_ref()), "static message");
        assert_eq!(panic_message(owned.as_ref()), "owned message");
        assert_eq!(panic_message(other.as_ref()), "non-string panic payload");
    }

    #[test]
    fn fatal_report_carries_the_backtrace() {
        let backtrace = Backtrace::force_capture();
        let report = fatal_report("src/relay.rs:1:2", "boom", &backtrace);

        assert!(report.starts_with("Fatal error at src/relay.rs:1:2: boom\n"));
        assert!(report.ends_with(&backtrace.to_string()));
    }
}
