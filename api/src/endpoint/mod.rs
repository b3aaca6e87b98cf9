pub mod responses;
pub mod responses_websocket;
