//! Seams between the supervisor and the outside world
//!
//! The supervisor learns its public address through an [`EgressIpSource`].
//! The production implementation is [`EchoClient`](crate::http::EchoClient),
//! which asks public IP-echo services through the proxy; tests substitute
//! their own.

use crate::error::Result;
use async_trait::async_trait;
use std::net::IpAddr;

/// Something that can report the egress IP currently seen through the proxy.
#[async_trait]
pub trait EgressIpSource: Send + Sync {
    /// Look up the public address.
    ///
    /// `subject_id` only tags log lines.
    async fn fetch_ip(&self, subject_id: Option<&str>) -> Result<IpAddr>;
}

/// Parse what an echo service reported, rejecting loopback answers.
///
/// Some services report the whole forwarding chain (`"1.2.3.4, 5.6.7.8"`);
/// the first entry is the client.
pub fn parse_reported_ip(raw: &str) -> Result<IpAddr> {
    let first = raw.split(',').next().unwrap_or_default().trim();
    if first.is_empty() || first.eq_ignore_ascii_case("localhost") {
        return Err(crate::ProxyError::InvalidIp(raw.trim().to_string()));
    }

    let ip: IpAddr = first
        .parse()
        .map_err(|_| crate::ProxyError::InvalidIp(first.to_string()))?;

    if ip.is_loopback() || ip.is_unspecified() {
        return Err(crate::ProxyError::InvalidIp(first.to_string()));
    }
    Ok(ip)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("203.0.113.7", "203.0.113.7")]
    #[case(" 203.0.113.7\n", "203.0.113.7")]
    #[case("198.51.100.1, 10.0.0.1", "198.51.100.1")]
    #[case("2001:db8::1", "2001:db8::1")]
    fn test_parse_reported_ip(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(parse_reported_ip(raw).unwrap().to_string(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("localhost")]
    #[case("127.0.0.1")]
    #[case("::1")]
    #[case("0.0.0.0")]
    #[case("<html>rate limited</html>")]
    fn test_parse_reported_ip_rejects(#[case] raw: &str) {
        let err = parse_reported_ip(raw).unwrap_err();
        assert!(matches!(err, crate::ProxyError::InvalidIp(_)));
    }
}
