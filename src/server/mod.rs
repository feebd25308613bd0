//! Network controller and its HTTP implementation

pub mod config;
pub mod controller;
pub mod listener;

pub use config::ServerConfig;
pub use controller::{
    message_handler, normalize, route_handler, MessageHandler, NetworkController, ResponseBody,
    Room, RoomRegistry, RouteHandler, RoutePattern, RouteRequest, RouteResponse, SocketClient,
    SocketEvent,
};
pub use listener::HttpController;
