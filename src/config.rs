use crate::probes::Layout;

/// Build-time description of the tester.  Construct in const context with the
/// chained setters, as for `crate::CONFIG`.
#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// MCU clock in Hz.
    pub cpu_freq: u32,
    /// MCU cycles per converter clock (the converter clock prescaler).
    pub cycles_per_adc: u32,
    /// Systematic error compensation, in 0.1%, for caps < 4.7µF.
    pub cap_factor_small: i16,
    /// ... for 4.7µF to 47µF (1ms pulses).
    pub cap_factor_mid: i16,
    /// ... for > 47µF (10ms pulses).
    pub cap_factor_large: i16,
    /// Separate RZero/CapZero per probe pair.
    pub multi_offset: bool,
    /// Measure the voltage loss of caps.
    pub vloss: bool,
    /// Fixed reference cap present; offsets are not adjusted from the DUT.
    pub hw_adjust: bool,
    pub layout: Layout,
    /// Converter channel of the reference cap.
    pub ref_cap_channel: u8,
}

impl Config {
    pub const fn new(cpu_freq: u32) -> Config {
        Config {
            cpu_freq,
            // 125kHz converter clock where the prescaler allows.
            cycles_per_adc: if cpu_freq >= 16000000 {128} else {64},
            cap_factor_small: 0,
            cap_factor_mid: -40,
            cap_factor_large: -90,
            multi_offset: false,
            vloss: false,
            hw_adjust: false,
            layout: Layout::STANDARD,
            ref_cap_channel: 5,
        }
    }
    pub const fn multi_offset(&mut self) -> &mut Self {
        self.multi_offset = true;
        self
    }
    pub const fn vloss(&mut self) -> &mut Self {
        self.vloss = true;
        self
    }
    pub const fn hw_adjust(&mut self, channel: u8) -> &mut Self {
        self.hw_adjust = true;
        self.ref_cap_channel = channel;
        self
    }
    pub const fn cap_factors(&mut self, small: i16, mid: i16, large: i16)
                             -> &mut Self {
        self.cap_factor_small = small;
        self.cap_factor_mid = mid;
        self.cap_factor_large = large;
        self
    }
    pub const fn layout(&mut self, layout: Layout) -> &mut Self {
        self.layout = layout;
        self
    }

    pub const fn cycles_per_us(&self) -> u32 {self.cpu_freq / 1000000}

    /// Timer overflows before the small cap measurement gives up, ≈13.1s.
    pub const fn overflow_budget(&self) -> u32 {self.cpu_freq / 5000}
}

/// Converter reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reference {
    Vcc,
    Bandgap,
}

/// Converter settings shared with the voltage reading routine.  Changed only
/// for the duration of a measurement step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Runtime {
    /// Reference used by the last conversion.
    pub reference: Reference,
    /// Switch to the bandgap reference for low voltages.
    pub auto_scale: bool,
    /// Bandgap voltage in mV, including the reference offset.
    pub bandgap: u16,
    /// Samples averaged per voltage reading.
    pub samples: u8,
}

pub const ADC_SAMPLES: u8 = 25;

impl Default for Runtime {
    fn default() -> Self {
        Runtime {
            reference: Reference::Vcc,
            auto_scale: true,
            bandgap: 1100,
            samples: ADC_SAMPLES,
        }
    }
}

static_assertions::const_assert!(crate::CONFIG.cpu_freq % 1000000 == 0);
static_assertions::const_assert!(crate::CONFIG.overflow_budget() < 65536);
static_assertions::const_assert!(crate::CONFIG.overflow_budget() > 0);

#[test]
fn builder() {
    const C: Config = {
        let mut c = Config::new(16000000);
        *c.vloss().hw_adjust(6)};
    assert!(C.vloss && C.hw_adjust && !C.multi_offset);
    assert_eq!(C.ref_cap_channel, 6);
    assert_eq!(C.cycles_per_adc, 128);
    assert_eq!(C.cycles_per_us(), 16);
    assert_eq!(C.overflow_budget(), 3200);
    let c = *Config::new(8000000).cap_factors(5, -10, -20);
    assert_eq!((c.cap_factor_small, c.cap_factor_mid, c.cap_factor_large),
               (5, -10, -20));
    assert_eq!(c.overflow_budget(), 1600);
}
