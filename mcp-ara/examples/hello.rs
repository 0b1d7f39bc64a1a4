use mcp_ara::{Bridge, BridgeConfig, DEFAULT_CONFIG_PATH};

const EEPROM_ADDR: u8 = 0x50;

fn main() {
    env_logger::init();

    let config = BridgeConfig::load_or_default(DEFAULT_CONFIG_PATH);
    let mut bridge = match Bridge::open(config) {
        Ok(bridge) => bridge,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    println!("Engine: {:?}", bridge.engine_state());

    match bridge.i2c_write(EEPROM_ADDR, &[0x01, 0x02]) {
        Ok(()) => println!("Write to {EEPROM_ADDR:#04x} acknowledged."),
        Err(e) => println!("Write to {EEPROM_ADDR:#04x} failed: {e}"),
    }

    let mut buffer = [0u8; 2];
    match bridge.i2c_read(EEPROM_ADDR, &mut buffer) {
        Ok(()) => println!("Read from {EEPROM_ADDR:#04x}: {buffer:02x?}"),
        Err(e) => println!("Read from {EEPROM_ADDR:#04x} failed: {e}"),
    }

    bridge.close();
}
