//! EK-TM4C123GXL LaunchPad bring-up: clocks, the tri-colour LED and the two
//! user buttons. The UART, EEPROM and flash peripherals are configured by
//! the C driver wrapper in `init_system`.

use embedded_hal::digital::v2::OutputPin;
use tm4c123x_hal::gpio::{gpiof::*, GpioExt, Input, Output, PullUp, PushPull};
use tm4c123x_hal::sysctl::{
    CrystalFrequency, Oscillator, PllOutputFrequency, SysctlExt, SystemClock,
};

/// The LaunchPad with the pins this firmware drives: the LEDs used for
/// transaction status and SW1/SW2 (SW1 triggers the unlock on a fob).
#[allow(non_snake_case)]
pub struct Board {
    pub core_peripherals: tm4c123x_hal::CorePeripherals,
    pub power_control: tm4c123x_hal::sysctl::PowerControl,
    /// The pin used for the Red LED
    pub led_red: PF1<Output<PushPull>>,
    /// The pin used for the Blue LED
    pub led_blue: PF2<Output<PushPull>>,
    /// The pin used for the Green LED
    pub led_green: PF3<Output<PushPull>>,
    /// The pin used for Button One
    pub button_one: PF4<Input<PullUp>>,
    /// The pin used for Button Two
    pub button_two: PF0<Input<PullUp>>,
    /// GPIO control for GPIO port F
    pub portf_control: tm4c123x_hal::gpio::gpiof::GpioControl,
}

impl Board {
    /// Initialise everything on the board - FPU, PLL, GPIO and the LEDs
    /// and buttons. Should be pretty much the first call you make in
    /// `main()`. Doesn't init the UARTs - that's separate.
    pub(crate) fn new() -> Board {
        let core_peripherals = unsafe { tm4c123x_hal::CorePeripherals::steal() };
        let peripherals = unsafe { tm4c123x_hal::Peripherals::steal() };
        let mut sysctl = peripherals.SYSCTL.constrain();

        // this might belong in tm4c123x_hal, but allow FPU usage
        unsafe {
            core_peripherals.SCB.cpacr.modify(|d| {
                d | (0x3 /* full */ << 20/* CP10 privilege */)
                    | (0x3 /* full */ << 22/* CP11 privilege */)
            });
        }

        sysctl.clock_setup.oscillator = Oscillator::Main(
            CrystalFrequency::_16mhz,
            SystemClock::UsePll(PllOutputFrequency::_66_67mhz),
        );
        let mut pins = peripherals.GPIO_PORTF.split(&sysctl.power_control);
        let led_red = pins.pf1.into_push_pull_output();
        let led_blue = pins.pf2.into_push_pull_output();
        let led_green = pins.pf3.into_push_pull_output();
        let button_one = pins.pf4.into_pull_up_input();
        let button_two = pins.pf0.unlock(&mut pins.control).into_pull_up_input();

        Board {
            core_peripherals,
            power_control: sysctl.power_control,
            led_red,
            led_blue,
            led_green,
            button_one,
            button_two,
            portf_control: pins.control,
        }
    }
}

/// Call from a panic handler to flash the red LED quickly.
pub fn panic() -> ! {
    let p = unsafe { tm4c123x_hal::Peripherals::steal() };
    let pins = p.GPIO_PORTF.split(&p.SYSCTL.constrain().power_control);

    let mut led_red = pins.pf1.into_push_pull_output();
    loop {
        let _ = led_red.set_high();
        for _ in 0..1_000_000 {
            cortex_m::asm::nop();
        }
        let _ = led_red.set_low();
        for _ in 0..1_000_000 {
            cortex_m::asm::nop();
        }
    }
}
