use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr};
use tokio::net::TcpListener;
use crate::error::{Error, Result};

/// Bind on all interfaces, walking upward from `preferred` while ports are taken.
///
/// `max_attempts` caps the walk; `None` keeps probing until the port range runs out.
/// Errors other than "address in use" end the walk immediately.
pub async fn bind(preferred: u16, max_attempts: Option<u32>) -> Result<(TcpListener, u16)> {
    let mut port = preferred;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));

        match TcpListener::bind(addr).await {
            Ok(listener) => {
                let actual = listener
                    .local_addr()
                    .map_err(|e| Error::Bind { port, source: e })?
                    .port();
                tracing::info!("Listening on {}", SocketAddr::from((Ipv4Addr::UNSPECIFIED, actual)));
                return Ok((listener, actual));
            }
            Err(e) if e.kind() == ErrorKind::AddrInUse => {
                let exhausted = max_attempts.is_some_and(|max| attempts >= max);
                let next = match port.checked_add(1) {
                    Some(next) if !exhausted => next,
                    _ => {
                        return Err(Error::PortsExhausted {
                            start: preferred,
                            attempts,
                        })
                    }
                };
                tracing::warn!("Port {} is in use, trying {}", port, next);
                port = next;
            }
            Err(e) => return Err(Error::Bind { port, source: e }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener as StdListener;

    /// Find `count` consecutive ports we can hold, plus a free one right after them
    fn occupy_consecutive(count: u16) -> (u16, Vec<StdListener>) {
        'search: loop {
            let first = StdListener::bind((Ipv4Addr::UNSPECIFIED, 0)).unwrap();
            let base = first.local_addr().unwrap().port();
            if base.checked_add(count + 1).is_none() {
                continue;
            }

            let mut held = vec![first];
            for offset in 1..count {
                match StdListener::bind((Ipv4Addr::UNSPECIFIED, base + offset)) {
                    Ok(listener) => held.push(listener),
                    Err(_) => continue 'search,
                }
            }

            // The port after the occupied block must be free right now
            if StdListener::bind((Ipv4Addr::UNSPECIFIED, base + count)).is_err() {
                continue;
            }
            return (base, held);
        }
    }

    #[tokio::test]
    async fn test_binds_preferred_when_free() {
        let (base, held) = occupy_consecutive(1);
        drop(held);

        let (_listener, port) = bind(base, None).await.unwrap();
        assert_eq!(port, base);
    }

    #[tokio::test]
    async fn test_skips_occupied_ports() {
        let (base, _held) = occupy_consecutive(3);

        let (listener, port) = bind(base, None).await.unwrap();
        assert_eq!(port, base + 3);
        assert!(listener.local_addr().unwrap().ip().is_unspecified());
    }

    #[tokio::test]
    async fn test_attempt_cap() {
        let (base, _held) = occupy_consecutive(2);

        let err = bind(base, Some(2)).await.unwrap_err();
        assert!(matches!(err, Error::PortsExhausted { start, attempts: 2 } if start == base));
    }

    #[tokio::test]
    async fn test_top_of_range_is_exhaustion() {
        let Ok(_held) = StdListener::bind((Ipv4Addr::UNSPECIFIED, u16::MAX)) else {
            // Someone else has it; that still exercises the same path
            let err = bind(u16::MAX, None).await.unwrap_err();
            assert!(matches!(err, Error::PortsExhausted { .. }));
            return;
        };

        let err = bind(u16::MAX, None).await.unwrap_err();
        assert!(matches!(err, Error::PortsExhausted { .. }));
    }
}
