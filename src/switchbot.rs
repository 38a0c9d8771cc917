mod device_type;
mod mode;
mod reading;

pub use device_type::*;
pub use mode::*;
pub use reading::*;
