pub mod crawler;
pub mod dom;
pub mod extract;
pub mod headers;
pub mod ports;
pub mod runner;
pub mod sqli;
pub mod sqlmap;
pub mod xss;
