pub mod logging;

pub mod io;
pub mod observer;
pub mod packet;
pub mod settings;
pub mod tools;

pub use io::serial::{parse_line, Command, DeviceLink, LinkOptions, SerialConfig};
pub use io::{LatestValueSlot, LinkError};
pub use observer::{LogRing, PacketObserver};
pub use packet::{Frame, PacketKind, SensorPacket};
pub use settings::{load_settings, Settings, SettingsError};
pub use tools::DeviceTools;
