//! SDK error classification
//!
//! Failures are classified by HTTP status first, then by a few S3 error
//! codes whose status alone is misleading.

use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_smithy_runtime_api::client::orchestrator::HttpResponse;
use objsync_core::Error;

/// Map an HTTP status (plus optional S3 error code) onto an engine error
pub fn classify_status(status: u16, code: Option<&str>, message: String) -> Error {
    match code {
        Some("RequestTimeout") | Some("SlowDown") | Some("Throttling") => {
            return Error::Transport(message);
        }
        Some("IncompleteBody") | Some("BadDigest") => return Error::Integrity(message),
        _ => {}
    }

    match status {
        300..=399 => Error::Redirect(message),
        401 | 403 => Error::Auth(message),
        404 => Error::NotFound(message),
        408 | 429 | 500..=599 => Error::Transport(message),
        400..=499 => Error::Request(message),
        _ => Error::General(message),
    }
}

/// Convert an SDK error for the request on `target`
pub(crate) fn map_sdk_error<E>(error: SdkError<E, HttpResponse>, target: &str) -> Error
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    match &error {
        SdkError::ServiceError(service_err) => {
            let err = service_err.err();
            let status = service_err.raw().status().as_u16();
            let mut message = format!("{target}: HTTP {status}");
            if let Some(code) = err.code() {
                message.push_str(&format!(" {code}"));
            }
            if let Some(detail) = err.message() {
                message.push_str(&format!(": {detail}"));
            }
            classify_status(status, err.code(), message)
        }
        SdkError::ResponseError(response_err) => {
            let status = response_err.raw().status().as_u16();
            let message = format!("{target}: {}", DisplayErrorContext(&error));
            if (200..300).contains(&status) {
                // The response arrived but could not be parsed
                Error::Transport(message)
            } else {
                classify_status(status, None, message)
            }
        }
        SdkError::TimeoutError(_) => Error::Transport(format!("{target}: request timeout")),
        SdkError::DispatchFailure(_) => Error::Transport(format!(
            "{target}: network dispatch error: {}",
            DisplayErrorContext(&error)
        )),
        SdkError::ConstructionFailure(_) => Error::Request(format!(
            "{target}: request construction failed: {}",
            DisplayErrorContext(&error)
        )),
        _ => Error::General(format!("{target}: {}", DisplayErrorContext(&error))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use objsync_core::ErrorClass;

    fn class(status: u16, code: Option<&str>) -> ErrorClass {
        classify_status(status, code, "test".to_string()).class()
    }

    #[test]
    fn test_redirects_are_transient() {
        assert!(matches!(
            classify_status(301, None, "moved".to_string()),
            Error::Redirect(_)
        ));
        assert_eq!(class(307, None), ErrorClass::Transient);
    }

    #[test]
    fn test_server_errors_and_throttling_are_transient() {
        for status in [408, 429, 500, 502, 503, 504] {
            assert_eq!(class(status, None), ErrorClass::Transient, "status {status}");
        }
        assert_eq!(class(400, Some("RequestTimeout")), ErrorClass::Transient);
    }

    #[test]
    fn test_client_errors_are_permanent() {
        assert!(matches!(
            classify_status(403, Some("AccessDenied"), String::new()),
            Error::Auth(_)
        ));
        assert!(matches!(
            classify_status(404, Some("NoSuchKey"), String::new()),
            Error::NotFound(_)
        ));
        assert!(matches!(
            classify_status(400, Some("InvalidArgument"), String::new()),
            Error::Request(_)
        ));
        assert_eq!(class(412, None), ErrorClass::Permanent);
    }

    #[test]
    fn test_incomplete_body_is_integrity() {
        assert_eq!(class(400, Some("IncompleteBody")), ErrorClass::Integrity);
        assert!(classify_status(400, Some("BadDigest"), String::new()).is_retryable());
    }
}
