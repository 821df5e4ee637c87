use crate::bridge::SessionBridge;
use crate::input::{parse_command, Command, PickupBot, DEFAULT_ITEM_VALUE};
use crate::presenter::Presenter;
use log::{error, info, warn};
use session::{SessionConfig, Subscription};
use shared::{decode_packet, encode_packet, Packet, MAX_PACKET_SIZE};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{interval, interval_at, MissedTickBehavior};

/// Keeps the hub from timing this participant out; also retries `Connect`
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

pub struct Client {
    socket: UdpSocket,
    server_addr: SocketAddr,
    tick_duration: Duration,

    bridge: SessionBridge,
    outbound_rx: mpsc::UnboundedReceiver<Packet>,
    events: Subscription,
    presenter: Presenter,
    bot: Option<PickupBot>,
    console: bool,
}

impl Client {
    pub async fn new(
        server_addr: &str,
        display_name: &str,
        config: SessionConfig,
        bot: Option<PickupBot>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let server_addr = server_addr.parse()?;
        let tick_duration = config.network_tick;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let bridge = SessionBridge::new(config, display_name, outbound_tx);
        let events = bridge.subscribe();

        Ok(Client {
            socket,
            server_addr,
            tick_duration,
            bridge,
            outbound_rx,
            events,
            presenter: Presenter::new(),
            bot,
            console: true,
        })
    }

    /// Skips reading commands from stdin; the bot and the hub still drive the session
    pub fn without_console(mut self) -> Self {
        self.console = false;
        self
    }

    async fn connect(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        info!("Connecting to server...");

        let packet = self.bridge.connect_packet();
        self.send_packet(&packet).await?;

        Ok(())
    }

    async fn send_packet(&self, packet: &Packet) -> Result<(), Box<dyn std::error::Error>> {
        let data = encode_packet(packet)?;
        self.socket.send_to(&data, self.server_addr).await?;
        Ok(())
    }

    fn on_tick(&mut self, elapsed: Duration) {
        self.bridge.tick(elapsed);

        let pick = match self.bot.as_mut() {
            Some(bot) => bot.on_tick(elapsed, self.bridge.session()),
            None => None,
        };
        if let Some(item_id) = pick {
            self.bridge.handle_command(Command::Pickup {
                item_id,
                value: DEFAULT_ITEM_VALUE,
            });
        }
    }

    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.connect().await?;

        let mut tick_interval = interval(self.tick_duration);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // First tick one period out so the Connect just sent has time to land
        let mut heartbeat_interval = interval_at(
            tokio::time::Instant::now() + HEARTBEAT_INTERVAL,
            HEARTBEAT_INTERVAL,
        );
        let mut last_tick = Instant::now();

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdin_open = self.console;
        let mut buffer = [0u8; MAX_PACKET_SIZE];

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, addr)) if addr == self.server_addr => {
                            match decode_packet(&buffer[0..len]) {
                                Ok(packet) => self.bridge.handle_packet(packet)?,
                                Err(e) => warn!("Dropping datagram: {}", e),
                            }
                        },
                        Ok((_, addr)) => warn!("Ignoring datagram from {}", addr),
                        Err(e) => error!("Error receiving packet: {}", e),
                    }
                },

                Some(packet) = self.outbound_rx.recv() => {
                    if let Err(e) = self.send_packet(&packet).await {
                        error!("Error sending relay packet: {}", e);
                    }
                },

                line = lines.next_line(), if stdin_open => {
                    match line {
                        Ok(Some(line)) => match parse_command(&line) {
                            Some(Command::Quit) => break,
                            Some(command) => self.bridge.handle_command(command),
                            None => warn!("Unknown command '{}' (r, e, p <item> [value], s, q)", line.trim()),
                        },
                        Ok(None) => {
                            info!("Console closed");
                            stdin_open = false;
                        },
                        Err(e) => {
                            error!("Error reading console: {}", e);
                            stdin_open = false;
                        },
                    }
                },

                _ = heartbeat_interval.tick() => {
                    let packet = if self.bridge.is_connected() {
                        Packet::Heartbeat
                    } else {
                        self.bridge.connect_packet()
                    };
                    if let Err(e) = self.send_packet(&packet).await {
                        error!("Error sending heartbeat: {}", e);
                    }
                },

                _ = tick_interval.tick() => {
                    let now = Instant::now();
                    let elapsed = now.duration_since(last_tick);
                    last_tick = now;
                    self.on_tick(elapsed);
                },
            }

            self.presenter.drain(&mut self.events);
        }

        if self.bridge.is_connected() {
            let _ = self.send_packet(&Packet::Disconnect).await;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_ok, block_on};

    #[test]
    fn test_rejects_bad_server_address() {
        let result = block_on(Client::new(
            "not-an-address",
            "alice",
            SessionConfig::default(),
            None,
        ));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_run_waits_before_retrying_connect() {
        let hub = assert_ok!(UdpSocket::bind("127.0.0.1:0").await);
        let hub_addr = assert_ok!(hub.local_addr()).to_string();

        let mut client = assert_ok!(
            Client::new(&hub_addr, "alice", SessionConfig::default(), None).await
        )
        .without_console();
        let window = HEARTBEAT_INTERVAL / 2;
        let count_connects = async {
            let mut buffer = [0u8; MAX_PACKET_SIZE];
            let mut connects = 0;
            let deadline = tokio::time::Instant::now() + window;
            while let Ok(received) =
                tokio::time::timeout_at(deadline, hub.recv_from(&mut buffer)).await
            {
                let (len, _) = assert_ok!(received);
                if matches!(assert_ok!(decode_packet(&buffer[..len])), Packet::Connect { .. }) {
                    connects += 1;
                }
            }
            connects
        };
        let (connects, _) = tokio::join!(
            count_connects,
            tokio::time::timeout(window, client.run())
        );

        assert_eq!(connects, 1);
    }

    #[tokio::test]
    async fn test_connect_sends_hello_to_hub() {
        let hub = assert_ok!(UdpSocket::bind("127.0.0.1:0").await);
        let hub_addr = assert_ok!(hub.local_addr()).to_string();

        let mut client = assert_ok!(
            Client::new(&hub_addr, "alice", SessionConfig::default(), None).await
        );
        assert_ok!(client.connect().await);

        let mut buffer = [0u8; MAX_PACKET_SIZE];
        let (len, _) = assert_ok!(
            tokio::time::timeout(Duration::from_secs(2), hub.recv_from(&mut buffer))
                .await
                .expect("timed out waiting for Connect")
        );
        match assert_ok!(decode_packet(&buffer[..len])) {
            Packet::Connect { display_name, .. } => assert_eq!(display_name, "alice"),
            other => panic!("Unexpected packet {:?}", other),
        }
    }
}
