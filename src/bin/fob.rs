#![no_std]
#![no_main]

use cortex_m_rt::entry;
use embedded_hal::digital::v2::OutputPin;
use rand_chacha::rand_core::SeedableRng;

use keyfob::{
    bytes_to_words, driverlib, get_combined_entropy, log,
    fob::{Fob, FobConfig},
    hal::{Eeprom, FlashStore, Uart},
    link::Error,
    secrets, setup_board,
    state::{FOB_IMAGE_LEN, FOB_STATE_PTR},
    words_to_bytes, Board,
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

struct FobEeprom;

impl Eeprom for FobEeprom {
    fn read(&mut self, buf: &mut [u8], addr: u32) {
        let mut words = [0u32; 16];
        let n = buf.len() / 4;
        driverlib::eeprom_read(&mut words[..n], addr);
        words_to_bytes(&words[..n], buf);
    }
}

/// The flash page holding the pairing record, committed by
/// erase-then-program.
struct FobFlash;

impl FlashStore for FobFlash {
    fn load(&mut self) -> [u8; FOB_IMAGE_LEN] {
        let mut words = [0u32; FOB_IMAGE_LEN / 4];
        driverlib::flash_read(&mut words, FOB_STATE_PTR);
        let mut image = [0u8; FOB_IMAGE_LEN];
        words_to_bytes(&words, &mut image);
        image
    }

    fn commit(&mut self, image: &[u8; FOB_IMAGE_LEN]) -> bool {
        let mut words = [0u32; FOB_IMAGE_LEN / 4];
        bytes_to_words(image, &mut words);
        driverlib::flash_erase(FOB_STATE_PTR) && driverlib::flash_program(&words, FOB_STATE_PTR)
    }
}

#[entry]
fn main() -> ! {
    let mut board: Board = setup_board();

    log!("This is fob!");

    // Seed the session RNG from the combined entropy sources.
    let entropy: [u8; 32] = get_combined_entropy();
    let rng = rand_chacha::ChaChaRng::from_seed(entropy);

    let mut eeprom = FobEeprom;
    let mut fob = Fob::new(
        HostUart,
        BoardUart,
        FobFlash,
        &mut eeprom,
        rng,
        FobConfig {
            car_id: secrets::CAR_ID,
            pair_pin: secrets::PAIR_PIN,
            car_secret: secrets::CAR_SECRET,
            factory_paired: cfg!(feature = "paired"),
        },
    );

    let mut previous_sw = false;

    loop {
        let host_outcome = fob.poll_host();
        flash_outcome(&mut board, host_outcome);
        let board_outcome = fob.poll_board();
        flash_outcome(&mut board, board_outcome);

        let current_sw = driverlib::read_sw_1();
        if current_sw && !previous_sw {
            // Debounce: sample again after a short spin.
            for _ in 0..10_000 {
                cortex_m::asm::nop();
            }
            if driverlib::read_sw_1() {
                log!("Fob: unlock requested");
                board.led_blue.set_high().unwrap();
                fob.button_pressed();
                board.led_blue.set_low().unwrap();
            }
        }
        previous_sw = current_sw;
    }
}

/// Pulse green for a completed command, red for a rejected one.
fn flash_outcome(board: &mut Board, outcome: Option<Result<(), Error>>) {
    match outcome {
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
