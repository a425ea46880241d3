#![no_std]
#![no_main]

use cortex_m_rt::entry;
use embedded_hal::digital::v2::OutputPin;
use rand_chacha::rand_core::SeedableRng;

use keyfob::{
    car::Car,
    driverlib, get_combined_entropy, log,
    hal::{Eeprom, Uart},
    secrets, setup_board, words_to_bytes, Board,
};

struct HostUart;

impl Uart for HostUart {
    fn avail(&mut self) -> bool {
        driverlib::uart_avail_host()
    }
    fn read_byte(&mut self) -> u8 {
        driverlib::uart_readb_host()
    }
    fn write_byte(&mut self, byte: u8) {
        driverlib::uart_writeb_host(byte)
    }
}

struct BoardUart;

impl Uart for BoardUart {
    fn avail(&mut self) -> bool {
        driverlib::uart_avail_board()
    }
    fn read_byte(&mut self) -> u8 {
        driverlib::uart_readb_board()
    }
    fn write_byte(&mut self, byte: u8) {
        driverlib::uart_writeb_board(byte)
    }
}

/// Banner storage: the unlock message and the three feature messages at the
/// top of EEPROM.
struct CarEeprom;

impl Eeprom for CarEeprom {
    fn read(&mut self, buf: &mut [u8], addr: u32) {
        let mut words = [0u32; 16];
        let n = buf.len() / 4;
        driverlib::eeprom_read(&mut words[..n], addr);
        words_to_bytes(&words[..n], buf);
    }
}

#[entry]
fn main() -> ! {
    let mut board: Board = setup_board();

    log!("This is car!");

    // Seed the session RNG from the combined entropy sources.
    let entropy: [u8; 32] = get_combined_entropy();
    let rng = rand_chacha::ChaChaRng::from_seed(entropy);

    let mut car = Car::new(HostUart, BoardUart, CarEeprom, rng, secrets::CAR_ID);

    loop {
        match car.poll_board() {
            Some(Ok(())) => {
                board.led_green.set_high().unwrap();
                driverlib::sleep_us(50_000);
                board.led_green.set_low().unwrap();
            }
            Some(Err(_)) => {
                board.led_red.set_high().unwrap();
                driverlib::sleep_us(50_000);
                board.led_red.set_low().unwrap();
            }
            None => {}
        }
    }
}
