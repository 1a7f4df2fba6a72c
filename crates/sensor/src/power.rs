//! Reference-counted device power

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use contracts::{ExtensionUnit, HidDevice, PowerState, Result, UvcDevice};
use tracing::{debug, error};

/// Device-specific power transition
pub trait PowerSwitch: Send + Sync {
    /// Bring the device to D0 and run any post-power initialisation
    fn power_on(&self) -> Result<()>;

    /// Suspend the device (D3)
    fn power_off(&self) -> Result<()>;
}

/// UVC power: D0 followed by extension-unit initialisation
pub struct UvcPowerSwitch {
    device: Arc<dyn UvcDevice>,
    xus: Arc<RwLock<Vec<ExtensionUnit>>>,
}

impl UvcPowerSwitch {
    pub fn new(device: Arc<dyn UvcDevice>, xus: Arc<RwLock<Vec<ExtensionUnit>>>) -> Self {
        Self { device, xus }
    }
}

impl PowerSwitch for UvcPowerSwitch {
    fn power_on(&self) -> Result<()> {
        self.device.set_power_state(PowerState::D0)?;
        for xu in self.xus.read().unwrap_or_else(PoisonError::into_inner).iter() {
            self.device.init_xu(xu)?;
        }
        Ok(())
    }

    fn power_off(&self) -> Result<()> {
        self.device.set_power_state(PowerState::D3)
    }
}

pub struct HidPowerSwitch {
    device: Arc<dyn HidDevice>,
}

impl HidPowerSwitch {
    pub fn new(device: Arc<dyn HidDevice>) -> Self {
        Self { device }
    }
}

impl PowerSwitch for HidPowerSwitch {
    fn power_on(&self) -> Result<()> {
        self.device.set_power_state(PowerState::D0)
    }

    fn power_off(&self) -> Result<()> {
        self.device.set_power_state(PowerState::D3)
    }
}

/// Counts power users; only the first acquire and last release touch the device
pub struct PowerController {
    users: Mutex<usize>,
    switch: Box<dyn PowerSwitch>,
}

impl PowerController {
    pub fn new(switch: Box<dyn PowerSwitch>) -> Arc<Self> {
        Arc::new(Self {
            users: Mutex::new(0),
            switch,
        })
    }

    /// Take a power reference. On a failed power-on the count is rolled back.
    pub fn acquire(self: &Arc<Self>) -> Result<PowerToken> {
        let mut users = self.users.lock().unwrap_or_else(PoisonError::into_inner);
        if *users == 0 {
            if let Err(e) = self.switch.power_on() {
                error!(error = %e, "acquire_power failed");
                return Err(e);
            }
            observability::record_power_transition("d0");
            debug!("device powered on");
        }
        *users += 1;
        Ok(PowerToken {
            controller: self.clone(),
        })
    }

    fn release(&self) {
        let mut users = self.users.lock().unwrap_or_else(PoisonError::into_inner);
        *users = users.saturating_sub(1);
        if *users == 0 {
            match self.switch.power_off() {
                Ok(()) => {
                    observability::record_power_transition("d3");
                    debug!("device powered off");
                }
                Err(e) => error!(error = %e, "release_power failed"),
            }
        }
    }

    pub fn users(&self) -> usize {
        *self.users.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Scoped power reference; released on drop
pub struct PowerToken {
    controller: Arc<PowerController>,
}

impl Drop for PowerToken {
    fn drop(&mut self) {
        self.controller.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::SensorError;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingSwitch {
        on: AtomicUsize,
        off: AtomicUsize,
        fail_on: AtomicBool,
        fail_off: AtomicBool,
    }

    impl PowerSwitch for Arc<CountingSwitch> {
        fn power_on(&self) -> Result<()> {
            if self.fail_on.load(Ordering::SeqCst) {
                return Err(SensorError::transport("D0 refused"));
            }
            self.on.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn power_off(&self) -> Result<()> {
            self.off.fetch_add(1, Ordering::SeqCst);
            if self.fail_off.load(Ordering::SeqCst) {
                return Err(SensorError::transport("D3 refused"));
            }
            Ok(())
        }
    }

    #[test]
    fn test_only_edges_touch_device() {
        let switch = Arc::new(CountingSwitch::default());
        let power = PowerController::new(Box::new(switch.clone()));

        let a = power.acquire().unwrap();
        let b = power.acquire().unwrap();
        assert_eq!(switch.on.load(Ordering::SeqCst), 1);
        assert_eq!(power.users(), 2);

        drop(a);
        assert_eq!(switch.off.load(Ordering::SeqCst), 0);
        drop(b);
        assert_eq!(switch.off.load(Ordering::SeqCst), 1);
        assert_eq!(power.users(), 0);
    }

    #[test]
    fn test_failed_power_on_rolls_back() {
        let switch = Arc::new(CountingSwitch::default());
        switch.fail_on.store(true, Ordering::SeqCst);
        let power = PowerController::new(Box::new(switch.clone()));

        assert!(power.acquire().is_err());
        assert_eq!(power.users(), 0);

        switch.fail_on.store(false, Ordering::SeqCst);
        let _token = power.acquire().unwrap();
        assert_eq!(switch.on.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_power_off_is_swallowed() {
        let switch = Arc::new(CountingSwitch::default());
        switch.fail_off.store(true, Ordering::SeqCst);
        let power = PowerController::new(Box::new(switch.clone()));

        drop(power.acquire().unwrap());
        assert_eq!(power.users(), 0);
        assert_eq!(switch.off.load(Ordering::SeqCst), 1);
    }
}
