//! Safe wrappers over the C `driverwrapper` library: UART byte I/O for the
//! host and board links, EEPROM and flash access, SW1, and the timers the
//! entropy gathering samples.

mod driverwrapper {
    #[link(name = "driverwrapper")]
    extern "C" {
        pub(super) fn init_system();
        pub(super) fn uart_avail_host() -> bool;
        pub(super) fn uart_avail_board() -> bool;
        pub(super) fn uart_readb_host() -> i32;
        pub(super) fn uart_readb_board() -> i32;
        pub(super) fn uart_writeb_host(data: u8);
        pub(super) fn uart_writeb_board(data: u8);
        pub(super) fn eeprom_read(data: *mut u32, address: u32, length: u32);
        pub(super) fn eeprom_write(data: *const u32, address: u32, length: u32);
        pub(super) fn flash_erase(address: u32) -> i32;
        pub(super) fn flash_program(data: *const u32, address: u32, length: u32) -> i32;
        pub(super) fn read_sw_1() -> bool;
        pub(super) fn sleep_us(us: u32);
        pub(super) fn get_tick_timer() -> u64;
        pub(super) fn get_temp_samples(data: *mut u32);
    }
}

const EEPROM_SIZE: u32 = 0x800; // 2K

/// Set up the system. This should be called after Board::new().
pub fn init_system() {
    unsafe {
        driverwrapper::init_system();
    }
}

/// Check if the host has sent a byte.
pub fn uart_avail_host() -> bool {
    unsafe { driverwrapper::uart_avail_host() }
}

/// Check if the board has sent a byte.
pub fn uart_avail_board() -> bool {
    unsafe { driverwrapper::uart_avail_board() }
}

/// Read a byte from the host.
pub fn uart_readb_host() -> u8 {
    let ret: i32 = unsafe { driverwrapper::uart_readb_host() };
    ret as u8
}

/// Read a byte from the board.
pub fn uart_readb_board() -> u8 {
    let ret: i32 = unsafe { driverwrapper::uart_readb_board() };
    ret as u8
}

/// Write a byte to the host.
pub fn uart_writeb_host(data: u8) {
    unsafe {
        driverwrapper::uart_writeb_host(data);
    }
}

/// Write a byte to the board.
pub fn uart_writeb_board(data: u8) {
    unsafe {
        driverwrapper::uart_writeb_board(data);
    }
}

/// Read from the EEPROM. Address must be a multiple of 4.
pub fn eeprom_read(data: &mut [u32], address: u32) {
    if data.is_empty() {
        return;
    }
    assert!(address + data.len() as u32 * 4 <= EEPROM_SIZE);
    unsafe {
        driverwrapper::eeprom_read(data.as_mut_ptr(), address, data.len() as u32 * 4);
    }
}

/// Write to the EEPROM. Address must be a multiple of 4.
pub fn eeprom_write(data: &[u32], address: u32) {
    if data.is_empty() {
        return;
    }
    assert!(address + data.len() as u32 * 4 <= EEPROM_SIZE);
    unsafe {
        driverwrapper::eeprom_write(data.as_ptr(), address, data.len() as u32 * 4);
    }
}

/// Erase the flash page containing `address`. Returns true on success.
pub fn flash_erase(address: u32) -> bool {
    unsafe { driverwrapper::flash_erase(address) == 0 }
}

/// Program words into previously erased flash. Address and length must be
/// multiples of 4. Returns true on success.
pub fn flash_program(data: &[u32], address: u32) -> bool {
    if data.is_empty() {
        return true;
    }
    unsafe { driverwrapper::flash_program(data.as_ptr(), address, data.len() as u32 * 4) == 0 }
}

/// Read words straight out of memory-mapped flash.
pub fn flash_read(data: &mut [u32], address: u32) {
    for (i, word) in data.iter_mut().enumerate() {
        unsafe {
            *word = core::ptr::read_volatile((address as usize + i * 4) as *const u32);
        }
    }
}

/// Check if switch 1 is pressed. Returns true if pressed.
pub fn read_sw_1() -> bool {
    unsafe { driverwrapper::read_sw_1() }
}

/// Busy-wait for the given number of microseconds.
pub fn sleep_us(us: u32) {
    unsafe {
        driverwrapper::sleep_us(us);
    }
}

/// Free-running tick counter, sampled for entropy.
pub fn get_tick_timer() -> u64 {
    unsafe { driverwrapper::get_tick_timer() }
}

/// Pull one burst of eight temperature-sensor samples.
pub fn get_temp_samples(data: &mut [u32; 8]) {
    unsafe {
        driverwrapper::get_temp_samples(data.as_mut_ptr());
    }
}
