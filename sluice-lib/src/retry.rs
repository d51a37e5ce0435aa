use std::io;

/// An extension trait to tell whether the peer closed the stream while a
/// request was in flight.
///
/// That is the only transport fault worth replaying right away: the request
/// was fine, the connection it travelled on was not. Timeouts, failed
/// connects and everything else are reported to the caller instead.
pub(crate) trait StreamClosedExt {
    fn is_stream_closed(&self) -> bool;
}

impl StreamClosedExt for reqwest::Error {
    fn is_stream_closed(&self) -> bool {
        if self.is_timeout()
            || self.is_connect()
            || self.is_builder()
            || self.is_redirect()
            || self.is_decode()
        {
            return false;
        }

        // reqwest does not expose hyper's error kinds, so look for them in
        // the chain of sources.
        if let Some(hyper_error) = get_source_error_type::<hyper::Error>(self) {
            // The hyper::Error(IncompleteMessage) is raised if the connection
            // is cut before the full response arrived, hyper::Error(Canceled)
            // if the connection was closed on the server side while the
            // request was queued on it.
            if hyper_error.is_incomplete_message() || hyper_error.is_canceled() {
                return true;
            }
            return get_source_error_type::<io::Error>(hyper_error).is_some_and(is_closed_io);
        }

        get_source_error_type::<io::Error>(self).is_some_and(is_closed_io)
    }
}

/// Classifies an `io::Error` as a stream closed by the peer.
fn is_closed_io(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
    )
}

/// Downcasts the given err source into T.
fn get_source_error_type<T: std::error::Error + 'static>(
    err: &dyn std::error::Error,
) -> Option<&T> {
    let mut source = err.source();

    while let Some(err) = source {
        if let Some(typed) = err.downcast_ref::<T>() {
            return Some(typed);
        }

        source = err.source();
    }
    None
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::{get_source_error_type, is_closed_io};

    #[derive(Debug, thiserror::Error)]
    #[error("outer")]
    struct Outer(#[source] io::Error);

    #[test]
    fn test_closed_io_kinds() {
        assert!(is_closed_io(&io::Error::from(io::ErrorKind::ConnectionReset)));
        assert!(is_closed_io(&io::Error::from(io::ErrorKind::UnexpectedEof)));
        assert!(!is_closed_io(&io::Error::from(io::ErrorKind::TimedOut)));
        assert!(!is_closed_io(&io::Error::from(
            io::ErrorKind::ConnectionRefused
        )));
    }

    #[test]
    fn test_source_lookup() {
        let error = Outer(io::Error::from(io::ErrorKind::BrokenPipe));
        let found = get_source_error_type::<io::Error>(&error).unwrap();
        assert_eq!(found.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn test_refused_connection_is_not_a_closed_stream() {
        use super::StreamClosedExt;

        // Nothing listens on port 9 of the loopback interface
        let error = reqwest::Client::new()
            .get("http://127.0.0.1:9/")
            .send()
            .await
            .unwrap_err();
        assert!(!error.is_stream_closed());
    }
}
