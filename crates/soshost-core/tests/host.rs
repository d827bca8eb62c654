//! Session-level behavior of [`SosHost`] without a real SOS module.

mod common;

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use common::{linux_target, services};
use soshost_core::loader::HELP_TEXT_FILE;
use soshost_core::{HostConfig, HostError, SosHost};

fn scratch_directory(name: &str) -> PathBuf
{
    let directory = std::env::temp_dir().join(format!("soshost-{}-{}", name, std::process::id()));
    fs::create_dir_all(&directory).unwrap();
    directory
}

#[test]
fn test_missing_module_fails_the_first_command()
{
    let (services, _) = services(Arc::new(linux_target()));
    let config = HostConfig::new().with_sos_directory("/nonexistent/soshost/sos");
    let mut host = SosHost::new(services, &config).unwrap();

    let err = host.execute_command(Some("clrstack -a")).unwrap_err();
    assert!(matches!(err, HostError::LibraryLoad { .. }), "{err}");
    assert!(err.to_string().contains("/nonexistent/soshost/sos"));
    assert!(!host.is_initialized());
}

#[test]
fn test_empty_command_is_rejected_before_loading()
{
    let (services, _) = services(Arc::new(linux_target()));
    let config = HostConfig::new().with_sos_directory("/nonexistent/soshost/sos");
    let mut host = SosHost::new(services, &config).unwrap();

    assert!(matches!(host.execute_command(Some("   ")), Err(HostError::InvalidArgument(_))));
    assert!(!host.is_initialized());
}

#[test]
fn test_help_text_comes_from_the_module_directory()
{
    let directory = scratch_directory("help");
    fs::write(
        directory.join(HELP_TEXT_FILE),
        "COMMAND: clrstack.\n!ClrStack [-a]\n\\\\\nCOMMAND: threads.\n!Threads\n\\\\\n",
    )
    .unwrap();

    let (services, _) = services(Arc::new(linux_target()));
    let host = SosHost::new(services, &HostConfig::new().with_sos_directory(&directory)).unwrap();
    assert_eq!(host.help_text("Threads").unwrap(), "!Threads\n");
    assert!(matches!(host.help_text("gcroot"), Err(HostError::HelpNotFound(_))));

    fs::remove_dir_all(&directory).unwrap();
}

#[test]
fn test_flush_reaches_the_target_subscribers()
{
    let target = Arc::new(linux_target());
    let (services, _) = services(target.clone());
    let host = SosHost::new(services, &HostConfig::new()).unwrap();

    let fired = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = fired.clone();
    let _ = target.flush_event.register(move || {
        counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    });
    host.flush();
    host.flush();
    assert_eq!(fired.load(std::sync::atomic::Ordering::SeqCst), 2);
}

#[test]
fn test_interrupt_token_is_shared_with_the_services()
{
    let (services, _) = services(Arc::new(linux_target()));
    let host = SosHost::new(services, &HostConfig::new()).unwrap();

    host.interrupt_token().request();
    assert!(host.services().interrupt.is_requested());
}
