//! Tests for error handling

use soshost_core::com::{ComError, Guid, HResult};
use soshost_core::types::Address;
use soshost_core::HostError;

#[test]
fn test_status_codes_at_the_native_boundary()
{
    assert_eq!(HResult::from(&HostError::InvalidArgument("size".into())), HResult::E_INVALIDARG);
    assert_eq!(HResult::from(&HostError::NotSupported("TLS".into())), HResult::E_NOTIMPL);
    assert_eq!(HResult::from(&HostError::CommandNotFound("foo".into())), HResult::E_NOTIMPL);
    assert_eq!(HResult::from(&HostError::Com(ComError::NoInterface(Guid::default()))), HResult::E_NOINTERFACE);
    assert_eq!(HResult::from(&HostError::ThreadNotFound(0x51)), HResult::E_FAIL);
    assert_eq!(HResult::from(&HostError::NotInitialized), HResult::E_FAIL);
}

#[test]
fn test_plugin_failures_keep_their_code()
{
    let err = HostError::CommandFailed {
        command: "clrstack".into(),
        hresult: HResult::E_UNEXPECTED,
    };
    assert_eq!(HResult::from(&err), HResult::E_UNEXPECTED);
    assert_eq!(HResult::from(&HostError::InitializationFailed(HResult::E_FAIL)), HResult::E_FAIL);
}

#[test]
fn test_attach_messages()
{
    assert_eq!(HostError::ProcessNotFound(1234).to_string(), "Process 1234 is not running.");
    assert_eq!(
        HostError::ArchitectureMismatch.to_string(),
        "Mismatched architecture between this process and the target process."
    );
}

#[test]
fn test_operational_messages()
{
    assert_eq!(HostError::ThreadNotFound(0x51).to_string(), "Thread not found: 0x51");
    assert_eq!(HostError::CommandNotFound("foo".into()).to_string(), "Unrecognized SOS command 'foo'");
    let err = HostError::ReadFailed {
        address: Address::new(0x1000),
        size: 8,
    };
    assert_eq!(err.to_string(), "Failed to read 8 bytes at 0x0000000000001000");
}

#[test]
fn test_io_errors_convert()
{
    let err: HostError = std::io::Error::new(std::io::ErrorKind::NotFound, "sosdocsunix.txt").into();
    assert!(matches!(err, HostError::Io(_)));
    assert!(err.to_string().contains("sosdocsunix.txt"));
}
