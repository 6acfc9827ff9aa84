//! Deadline propagation for unary RPCs: parses the `grpc-timeout` metadata
//! header gRPC clients attach to every call and stamps an absolute instant
//! onto the request's extensions, so a handler can check "has my caller's
//! budget already run out" before doing any real work.

use std::time::{Duration, Instant};

use tonic::service::Interceptor;
use tonic::{Request, Status};

/// The absolute instant by which a handler must have produced a response,
/// derived from the request's `grpc-timeout` header at the moment it was
/// accepted.
#[derive(Clone, Copy, Debug)]
pub struct Deadline(pub Instant);

/// Parses a gRPC `TimeoutValue` (ASCII digits followed by a one-character
/// unit: `H`/`M`/`S`/`m`/`u`/`n`) into a [`Duration`].
fn parse_grpc_timeout(raw: &str) -> Option<Duration> {
    if raw.len() < 2 {
        return None;
    }
    let (digits, unit) = raw.split_at(raw.len() - 1);
    let amount: u64 = digits.parse().ok()?;
    Some(match unit {
        "H" => Duration::from_secs(amount * 3600),
        "M" => Duration::from_secs(amount * 60),
        "S" => Duration::from_secs(amount),
        "m" => Duration::from_millis(amount),
        "u" => Duration::from_micros(amount),
        "n" => Duration::from_nanos(amount),
        _ => return None,
    })
}

/// Attached to the server via `with_interceptor`; stamps a [`Deadline`]
/// extension onto every request that carries a `grpc-timeout` header.
#[derive(Clone, Copy, Debug, Default)]
pub struct DeadlineInterceptor;

impl Interceptor for DeadlineInterceptor {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        if let Some(raw) = request
            .metadata()
            .get("grpc-timeout")
            .and_then(|v| v.to_str().ok())
        {
            if let Some(budget) = parse_grpc_timeout(raw) {
                request.extensions_mut().insert(Deadline(Instant::now() + budget));
            }
        }
        Ok(request)
    }
}

/// Checks a request's stamped [`Deadline`], if any, and short-circuits with
/// `DeadlineExceeded` when it has already passed. Called at the top of every
/// unary handler, before acquiring any Node Store lock.
pub fn check_deadline<T>(request: &Request<T>) -> Result<(), Status> {
    match request.extensions().get::<Deadline>() {
        Some(Deadline(at)) if Instant::now() >= *at => {
            Err(Status::deadline_exceeded("client deadline already elapsed"))
        }
        _ => Ok(()),
    }
}
