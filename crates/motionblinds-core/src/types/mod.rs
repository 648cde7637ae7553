mod device_type;
mod mac;
mod operation;
mod position;

pub use device_type::DeviceType;
pub use mac::Mac;
pub use operation::Operation;
pub use position::Position;
