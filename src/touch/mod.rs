//! Capacitive touch buttons.
//!
//! The IQS620 reports per-channel proximity and touch bits in one flags
//! register. [`TouchStateMachine`] compares each new snapshot with the
//! previous one and turns the differences into [`ButtonEvent`]s for the two
//! buttons (channels 0 and 1).

pub mod iqs620;

use bitflags::bitflags;

bitflags! {
    /// Snapshot of the PROX_FUSION_FLAGS register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ProxFusionFlags: u8 {
        const CH0_PROX = 1 << 0;
        const CH1_PROX = 1 << 1;
        const CH2_PROX = 1 << 2;
        const CH0_TOUCH = 1 << 4;
        const CH1_TOUCH = 1 << 5;
        const CH2_TOUCH = 1 << 6;
    }
}

impl Default for ProxFusionFlags {
    fn default() -> Self {
        Self::empty()
    }
}

impl ProxFusionFlags {
    /// Prox/touch state of the channel behind `button`.
    pub fn channel(self, button: Button) -> ChannelState {
        let (prox, touch) = match button {
            Button::B0 => (Self::CH0_PROX, Self::CH0_TOUCH),
            Button::B1 => (Self::CH1_PROX, Self::CH1_TOUCH),
        };
        ChannelState {
            prox: self.contains(prox),
            touch: self.contains(touch),
        }
    }
}

/// The two sensing pads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Button {
    B0 = 0,
    B1 = 1,
}

impl Button {
    pub const ALL: [Button; 2] = [Button::B0, Button::B1];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ButtonEvent {
    /// Touch asserted.
    Down,
    /// Finger hovering: proximity asserted without touch, or touch released
    /// while proximity remains.
    Prox,
    /// Proximity released.
    Up,
}

/// Prox/touch bits of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelState {
    pub prox: bool,
    pub touch: bool,
}

/// Event produced by a channel going from `old` to `new`, if any.
///
/// Touch changes take precedence; proximity only reports while touch is
/// unchanged and released.
pub fn transition(old: ChannelState, new: ChannelState) -> Option<ButtonEvent> {
    if new.touch && !old.touch {
        Some(ButtonEvent::Down)
    } else if !new.touch && old.touch {
        // Prox normally stays asserted through touch, so this is the
        // common release path.
        Some(if new.prox { ButtonEvent::Prox } else { ButtonEvent::Up })
    } else if new.touch {
        None
    } else if new.prox && !old.prox {
        Some(ButtonEvent::Prox)
    } else if !new.prox && old.prox {
        Some(ButtonEvent::Up)
    } else {
        None
    }
}

/// Receiver of button events.
///
/// Called from the touch service path with the bus transaction still in
/// flight, so implementations must return promptly and never wait on
/// anything.
pub trait TouchHandler {
    fn on_button(&mut self, button: Button, event: ButtonEvent);
}

impl<F: FnMut(Button, ButtonEvent)> TouchHandler for F {
    fn on_button(&mut self, button: Button, event: ButtonEvent) {
        self(button, event)
    }
}

/// Edge detector over successive flag snapshots.
#[derive(Debug, Clone, Default)]
pub struct TouchStateMachine {
    previous: ProxFusionFlags,
    /// Bit n set from button n's Down until its Up.
    pressed: u16,
}

impl TouchStateMachine {
    pub const fn new() -> Self {
        Self {
            previous: ProxFusionFlags::empty(),
            pressed: 0,
        }
    }

    /// Feed a new snapshot. Channel 0 is evaluated before channel 1, so a
    /// snapshot that changes both produces B0's event first.
    pub fn update<H: TouchHandler + ?Sized>(&mut self, flags: ProxFusionFlags, handler: &mut H) {
        for button in Button::ALL {
            let old = self.previous.channel(button);
            let new = flags.channel(button);
            let Some(event) = transition(old, new) else {
                continue;
            };

            let bit = 1u16 << button as u16;
            match event {
                ButtonEvent::Down => self.pressed |= bit,
                ButtonEvent::Up => self.pressed &= !bit,
                ButtonEvent::Prox => {}
            }
            handler.on_button(button, event);
        }
        self.previous = flags;
    }

    /// Buttons between Down and Up, bit n for button n.
    pub fn button_status(&self) -> u16 {
        self.pressed
    }

    /// Last snapshot fed to [`update`](Self::update).
    pub fn flags(&self) -> ProxFusionFlags {
        self.previous
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Unit Tests
// ═══════════════════════════════════════════════════════════════════════════
