//! `test-utils` is used for testing in both `sluice-lib` and `sluice-bin`.
//! This crate does not depend on `sluice-lib` or `sluice-bin`, else we would get dependency cycles.
//! Macros are used instead, so that the importer is responsible for providing the dependencies.

/// Create a mock API server which answers every request to `$route` with
/// `$method` with the given status. Further `ResponseTemplate` methods can be
/// chained, e.g. `mock_server!("GET", "/users/@me", 200, set_body_string("{}"))`.
///
/// Requests to other routes, including the connection probe, get a `404`.
#[macro_export]
macro_rules! mock_server {
    ($method:expr, $route:expr, $status:expr $(, $func:tt ($($arg:expr),*))*) => {{
        let mock_server = wiremock::MockServer::start().await;
        let response_template = wiremock::ResponseTemplate::new($status);
        let template = response_template$(.$func($($arg),*))*;
        wiremock::Mock::given(wiremock::matchers::method($method))
            .and(wiremock::matchers::path($route))
            .respond_with(template)
            .mount(&mock_server)
            .await;
        mock_server
    }};
}

/// Add the rate-limit headers of a bucket with `$remaining` requests left
/// which resets `$reset_in` (a `Duration`) from now to a `ResponseTemplate`.
#[macro_export]
macro_rules! with_bucket {
    ($template:expr, $remaining:expr, $reset_in:expr) => {{
        let reset = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            + $reset_in;
        $template
            .insert_header("x-ratelimit-remaining", $remaining.to_string().as_str())
            .insert_header(
                "x-ratelimit-reset",
                format!("{:.3}", reset.as_secs_f64()).as_str(),
            )
    }};
}

/// Start a dispatcher talking to the given mock server. The background sweep
/// is disabled so that tests stay deterministic.
#[macro_export]
macro_rules! mock_dispatcher {
    ($server:expr) => {
        sluice_lib::DispatcherBuilder::builder()
            .token(secrecy::SecretString::from("test-token".to_string()))
            .base_url($server.uri())
            .sweep_interval(std::time::Duration::ZERO)
            .build()
            .dispatcher()
            .await
            .unwrap()
    };
}
