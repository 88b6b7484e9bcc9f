pub mod handshake;
pub mod mock_bus;
pub mod mock_channel;
