//! WebSocket Transport
//!
//! Carries the live feed to clients as JSON packets.
//!
//! ## Architecture
//!
//! - **ClientSession**: one per connection; owns its attached subscriptions
//! - **Handler**: WebSocket upgrade and frame loop
//! - **Messages**: client and server packet formats
//!
//! ## Example
//!
//! ```javascript
//! // Browser
//! const ws = new WebSocket('ws://localhost:8090/mydb?route=/posts/1');
//!
//! ws.onmessage = (event) => {
//!   const packet = JSON.parse(event.data);
//!   if (packet.e === 'p') render(packet.d);
//!   if (packet.e === 'o') apply(packet.d);
//! };
//!
//! // attach a subscription exposed over HTTP
//! ws.send(JSON.stringify({e: 'subscribe', i: subscriptionId}));
//! ```

mod handler;
mod messages;
mod session;

pub use handler::{websocket_handler, ConnectParams};
pub use messages::{ClientPacket, PacketError, ServerPacket};
pub use session::{ClientSession, ConnectionId};
