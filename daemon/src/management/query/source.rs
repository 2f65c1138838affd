use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::{lookup_host, UdpSocket};
use tokio::time::timeout;

use super::QueryClient;
use gsm_protocol::management::instance::QueryResponse;

const SIMPLE_HEADER: [u8; 4] = [0xFF; 4];
const A2S_INFO: u8 = 0x54;
const S2C_CHALLENGE: u8 = 0x41;
const S2A_INFO_SOURCE: u8 = 0x49;
const S2A_INFO_GOLDSOURCE: u8 = 0x6D;
const MAX_PACKET: usize = 1400;

#[derive(Debug, PartialEq, Eq)]
enum InfoReply {
    Challenge([u8; 4]),
    Info(QueryResponse),
}

/// A2S_INFO client for Source and GoldSource servers.
pub struct SourceQuery {
    timeout: Duration,
}

impl Default for SourceQuery {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl SourceQuery {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn request(challenge: Option<[u8; 4]>) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(29);
        buffer.extend_from_slice(&SIMPLE_HEADER);
        buffer.push(A2S_INFO);
        buffer.extend_from_slice(b"Source Engine Query\0");
        if let Some(challenge) = challenge {
            buffer.extend_from_slice(&challenge);
        }
        buffer
    }

    async fn exchange(&self, socket: &UdpSocket, request: &[u8]) -> Result<InfoReply> {
        socket.send(request).await?;
        let mut buffer = [0u8; MAX_PACKET];
        let len = timeout(self.timeout, socket.recv(&mut buffer))
            .await
            .context("query timed out")??;
        parse_reply(&buffer[..len])
    }
}

#[async_trait]
impl QueryClient for SourceQuery {
    async fn query(&self, host: &str, port: u16) -> Result<QueryResponse> {
        let target = lookup_host((host, port))
            .await
            .with_context(|| format!("Failed to resolve {}:{}", host, port))?
            .next()
            .with_context(|| format!("{} has no address", host))?;
        let socket = UdpSocket::bind(bind_address(&target)).await?;
        socket
            .connect(target)
            .await
            .with_context(|| format!("Failed to connect to {}", target))?;

        let mut reply = self.exchange(&socket, &Self::request(None)).await?;
        // servers may ask for the challenge more than once
        for _ in 0..2 {
            match reply {
                InfoReply::Challenge(challenge) => {
                    reply = self.exchange(&socket, &Self::request(Some(challenge))).await?;
                }
                InfoReply::Info(response) => return Ok(response),
            }
        }
        match reply {
            InfoReply::Info(response) => Ok(response),
            InfoReply::Challenge(_) => bail!("server kept answering with a challenge"),
        }
    }
}

/// Wildcard local address in the target's family.
fn bind_address(target: &SocketAddr) -> SocketAddr {
    match target {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    }
}

fn parse_reply(data: &[u8]) -> Result<InfoReply> {
    if data.len() < 5 || data[..4] != SIMPLE_HEADER {
        bail!("unexpected packet header");
    }
    let mut offset = 5;
    match data[4] {
        S2C_CHALLENGE => {
            let challenge = read_bytes::<4>(data, &mut offset)?;
            Ok(InfoReply::Challenge(challenge))
        }
        S2A_INFO_SOURCE => {
            let _protocol = read_u8(data, &mut offset)?;
            let name = read_string(data, &mut offset)?;
            let map = read_string(data, &mut offset)?;
            let _folder = read_string(data, &mut offset)?;
            let _game = read_string(data, &mut offset)?;
            let _app_id = read_bytes::<2>(data, &mut offset)?;
            let players = read_u8(data, &mut offset)?;
            let max_players = read_u8(data, &mut offset)?;
            let bots = read_u8(data, &mut offset)?;
            Ok(InfoReply::Info(response(name, map, players, max_players, bots)))
        }
        S2A_INFO_GOLDSOURCE => {
            let _address = read_string(data, &mut offset)?;
            let name = read_string(data, &mut offset)?;
            let map = read_string(data, &mut offset)?;
            let _folder = read_string(data, &mut offset)?;
            let _game = read_string(data, &mut offset)?;
            let players = read_u8(data, &mut offset)?;
            let max_players = read_u8(data, &mut offset)?;
            let _protocol = read_u8(data, &mut offset)?;
            let _server_type = read_u8(data, &mut offset)?;
            let _environment = read_u8(data, &mut offset)?;
            let _visibility = read_u8(data, &mut offset)?;
            if read_u8(data, &mut offset)? == 1 {
                // mod block: link, download link, null, version, size, type, dll
                read_string(data, &mut offset)?;
                read_string(data, &mut offset)?;
                read_u8(data, &mut offset)?;
                read_bytes::<8>(data, &mut offset)?;
                read_u8(data, &mut offset)?;
                read_u8(data, &mut offset)?;
            }
            let _vac = read_u8(data, &mut offset)?;
            let bots = read_u8(data, &mut offset)?;
            Ok(InfoReply::Info(response(name, map, players, max_players, bots)))
        }
        other => bail!("unexpected response type 0x{:02X}", other),
    }
}

fn response(name: String, map: String, players: u8, max_players: u8, bots: u8) -> QueryResponse {
    QueryResponse {
        name,
        map,
        players,
        max_players,
        bots,
        captured_at: Utc::now(),
    }
}

fn read_u8(data: &[u8], offset: &mut usize) -> Result<u8> {
    let value = *data.get(*offset).context("Unexpected end of data")?;
    *offset += 1;
    Ok(value)
}

fn read_bytes<const N: usize>(data: &[u8], offset: &mut usize) -> Result<[u8; N]> {
    let bytes = data
        .get(*offset..*offset + N)
        .context("Unexpected end of data")?;
    *offset += N;
    let mut value = [0u8; N];
    value.copy_from_slice(bytes);
    Ok(value)
}

fn read_string(data: &[u8], offset: &mut usize) -> Result<String> {
    let rest = data.get(*offset..).context("Unexpected end of data")?;
    let end = rest
        .iter()
        .position(|b| *b == 0)
        .context("Unterminated string")?;
    let value = String::from_utf8_lossy(&rest[..end]).into_owned();
    *offset += end + 1;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source_info() -> Vec<u8> {
        let mut packet = SIMPLE_HEADER.to_vec();
        packet.push(S2A_INFO_SOURCE);
        packet.push(17);
        packet.extend_from_slice(b"GSM - Server #1\0ch_cypruspark\0contagion\0Contagion\0");
        packet.extend_from_slice(&238u16.to_le_bytes());
        packet.extend_from_slice(&[3, 8, 1]);
        packet.extend_from_slice(b"dw\0\x01");
        packet
    }

    #[test]
    fn parses_source_info() {
        let InfoReply::Info(response) = parse_reply(&source_info()).unwrap() else {
            panic!("expected info");
        };
        assert_eq!(response.name, "GSM - Server #1");
        assert_eq!(response.map, "ch_cypruspark");
        assert_eq!((response.players, response.max_players, response.bots), (3, 8, 1));
    }

    #[test]
    fn parses_challenge() {
        let packet = [0xFF, 0xFF, 0xFF, 0xFF, S2C_CHALLENGE, 1, 2, 3, 4];
        assert_eq!(
            parse_reply(&packet).unwrap(),
            InfoReply::Challenge([1, 2, 3, 4])
        );
    }

    #[test]
    fn rejects_truncated_packets() {
        let packet = source_info();
        assert!(parse_reply(&packet[..20]).is_err());
        assert!(parse_reply(&[0xFE, 0xFF, 0xFF, 0xFF, 0x49]).is_err());
    }

    #[test]
    fn challenge_is_appended_to_request() {
        let request = SourceQuery::request(Some([9, 8, 7, 6]));
        assert_eq!(request.len(), 29);
        assert_eq!(&request[25..], &[9, 8, 7, 6]);
    }

    #[tokio::test]
    async fn query_answers_challenge() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut buffer = [0u8; MAX_PACKET];
            let (_, peer) = server.recv_from(&mut buffer).await.unwrap();
            server
                .send_to(&[0xFF, 0xFF, 0xFF, 0xFF, S2C_CHALLENGE, 1, 2, 3, 4], peer)
                .await
                .unwrap();
            let (len, peer) = server.recv_from(&mut buffer).await.unwrap();
            assert_eq!(&buffer[len - 4..len], &[1, 2, 3, 4]);
            server.send_to(&source_info(), peer).await.unwrap();
        });

        let response = SourceQuery::default().query("127.0.0.1", port).await.unwrap();
        assert_eq!(response.players, 3);
    }

    #[test]
    fn binds_in_the_target_family() {
        let v4: SocketAddr = "192.0.2.7:27015".parse().unwrap();
        let v6: SocketAddr = "[2001:db8::7]:27015".parse().unwrap();
        assert!(bind_address(&v4).is_ipv4());
        assert!(bind_address(&v6).is_ipv6());
    }

    #[tokio::test]
    async fn queries_an_ipv6_server() {
        // hosts without an IPv6 loopback have nothing to test
        let Ok(server) = UdpSocket::bind("[::1]:0").await else {
            return;
        };
        let port = server.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut buffer = [0u8; MAX_PACKET];
            let (_, peer) = server.recv_from(&mut buffer).await.unwrap();
            server.send_to(&source_info(), peer).await.unwrap();
        });

        let response = SourceQuery::default().query("::1", port).await.unwrap();
        assert_eq!(response.map, "ch_cypruspark");
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();
        let client = SourceQuery::new(Duration::from_millis(100));
        assert!(client.query("127.0.0.1", port).await.is_err());
        drop(server);
    }
}
