pub mod fsdp;
pub mod svfw_message;
pub mod svfw_packet;
pub mod tcp;
pub mod udp;
