//! Audio device registry
//!
//! Enumerates input and output devices, classifies them by kind, and
//! notifies subscribed observers when the device set changes. Observers are
//! held weakly: the registry never keeps a session alive. The cpal-backed
//! enumerator is the production path; tests inject fakes.

use crate::error::DeviceError;
use std::sync::{Mutex, Weak};

/// Physical kind of an audio endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    BuiltinMic,
    BuiltinSpeaker,
    UsbDevice,
    UsbHeadset,
    UsbAccessory,
    WiredHeadset,
    WiredHeadphones,
    BluetoothA2dp,
    BluetoothLe,
    BluetoothSco,
    Other,
}

impl DeviceKind {
    /// External input devices: anything that displaces the built-in mic.
    pub fn is_external_input(self) -> bool {
        matches!(
            self,
            DeviceKind::UsbDevice
                | DeviceKind::UsbHeadset
                | DeviceKind::UsbAccessory
                | DeviceKind::WiredHeadset
        )
    }

    /// Priority for monitor output routing; lower is preferred. None means
    /// the kind is never used for monitoring output.
    fn output_priority(self) -> Option<u8> {
        match self {
            DeviceKind::BluetoothA2dp | DeviceKind::BluetoothLe => Some(0),
            DeviceKind::BluetoothSco => Some(1),
            DeviceKind::WiredHeadset | DeviceKind::WiredHeadphones => Some(2),
            DeviceKind::BuiltinSpeaker => Some(3),
            _ => None,
        }
    }

    /// Output kinds that are acoustically isolated from the built-in mic.
    fn is_isolated_output(self) -> bool {
        matches!(
            self,
            DeviceKind::BluetoothA2dp
                | DeviceKind::BluetoothLe
                | DeviceKind::BluetoothSco
                | DeviceKind::WiredHeadset
                | DeviceKind::WiredHeadphones
                | DeviceKind::UsbDevice
                | DeviceKind::UsbHeadset
        )
    }
}

/// One enumerated audio endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: String,
    pub kind: DeviceKind,
    pub display_name: String,
}

/// Observer notified when the available input devices change.
pub trait DeviceObserver: Send + Sync {
    fn on_devices_changed(&self, inputs: &[DeviceInfo]);
}

/// Source of raw device listings. Production uses cpal; tests use fakes.
pub trait DeviceEnumerator: Send + Sync {
    fn inputs(&self) -> Vec<DeviceInfo>;
    fn outputs(&self) -> Vec<DeviceInfo>;
}

/// cpal-backed enumerator. Kind classification is name-based, the same
/// pragmatic substring matching used for device lookup.
pub struct CpalEnumerator;

impl CpalEnumerator {
    fn collect(input: bool) -> Vec<DeviceInfo> {
        use cpal::traits::{DeviceTrait, HostTrait};

        let host = cpal::default_host();
        let devices = if input {
            host.input_devices()
        } else {
            host.output_devices()
        };
        let devices = match devices {
            Ok(devices) => devices,
            Err(e) => {
                tracing::warn!("Device enumeration failed: {}", e);
                return Vec::new();
            }
        };

        devices
            .filter_map(|device| {
                let name = device.name().ok()?;
                Some(DeviceInfo {
                    id: name.clone(),
                    kind: classify_device_name(&name, input),
                    display_name: name,
                })
            })
            .collect()
    }
}

impl DeviceEnumerator for CpalEnumerator {
    fn inputs(&self) -> Vec<DeviceInfo> {
        Self::collect(true)
    }

    fn outputs(&self) -> Vec<DeviceInfo> {
        Self::collect(false)
    }
}

/// Guess a device kind from its name. Host APIs expose transport in the
/// device name only, so substring matching is the best available signal.
fn classify_device_name(name: &str, input: bool) -> DeviceKind {
    let lower = name.to_lowercase();
    if lower.contains("bluez") || lower.contains("bluetooth") {
        if lower.contains("sco") || lower.contains("handsfree") {
            return DeviceKind::BluetoothSco;
        }
        return DeviceKind::BluetoothA2dp;
    }
    if lower.contains("usb") {
        if lower.contains("headset") {
            return DeviceKind::UsbHeadset;
        }
        return DeviceKind::UsbDevice;
    }
    if lower.contains("headset") {
        return DeviceKind::WiredHeadset;
    }
    if lower.contains("headphone") {
        return DeviceKind::WiredHeadphones;
    }
    if input {
        DeviceKind::BuiltinMic
    } else {
        DeviceKind::BuiltinSpeaker
    }
}

/// Process-wide device registry with observer semantics.
pub struct DeviceRegistry {
    enumerator: Box<dyn DeviceEnumerator>,
    observers: Mutex<Vec<Weak<dyn DeviceObserver>>>,
    known_inputs: Mutex<Vec<DeviceInfo>>,
}

impl DeviceRegistry {
    pub fn new(enumerator: Box<dyn DeviceEnumerator>) -> Self {
        let known_inputs = enumerator.inputs();
        Self {
            enumerator,
            observers: Mutex::new(Vec::new()),
            known_inputs: Mutex::new(known_inputs),
        }
    }

    pub fn with_cpal() -> Self {
        Self::new(Box::new(CpalEnumerator))
    }

    /// All available input devices.
    pub fn list_inputs(&self) -> Vec<DeviceInfo> {
        self.enumerator.inputs()
    }

    /// Input devices that displace the built-in mic (USB, wired headset).
    pub fn external_inputs(&self) -> Vec<DeviceInfo> {
        self.enumerator
            .inputs()
            .into_iter()
            .filter(|d| d.kind.is_external_input())
            .collect()
    }

    /// All available output devices.
    pub fn list_outputs(&self) -> Vec<DeviceInfo> {
        self.enumerator.outputs()
    }

    /// Look up an input device by id.
    pub fn input_by_id(&self, id: &str) -> Option<DeviceInfo> {
        self.enumerator.inputs().into_iter().find(|d| d.id == id)
    }

    pub fn subscribe(&self, observer: Weak<dyn DeviceObserver>) {
        self.observers.lock().unwrap().push(observer);
    }

    pub fn unsubscribe(&self, observer: &Weak<dyn DeviceObserver>) {
        self.observers
            .lock()
            .unwrap()
            .retain(|o| !o.ptr_eq(observer));
    }

    /// Re-enumerate and notify observers if the input set changed. Hosts
    /// call this from their hot-plug hook or on a timer.
    pub fn refresh(&self) -> Result<(), DeviceError> {
        let inputs = self.enumerator.inputs();
        let changed = {
            let mut known = self.known_inputs.lock().unwrap();
            if *known != inputs {
                *known = inputs.clone();
                true
            } else {
                false
            }
        };

        if changed {
            tracing::debug!("Input device set changed: {} devices", inputs.len());
            let mut observers = self.observers.lock().unwrap();
            observers.retain(|weak| match weak.upgrade() {
                Some(observer) => {
                    observer.on_devices_changed(&inputs);
                    true
                }
                None => false,
            });
        }
        Ok(())
    }

    /// Pick the monitoring output: Bluetooth A2DP/LE, then SCO, then wired,
    /// then the built-in speaker — never the currently-selected input
    /// device, which would loop recorded audio back into itself.
    pub fn preferred_monitor_output(&self, exclude_input: Option<&str>) -> Option<DeviceInfo> {
        self.enumerator
            .outputs()
            .into_iter()
            .filter(|d| Some(d.id.as_str()) != exclude_input)
            .filter_map(|d| d.kind.output_priority().map(|p| (p, d)))
            .min_by_key(|(p, _)| *p)
            .map(|(_, d)| d)
    }

    /// Monitoring feedback risk: the input is the built-in mic and the only
    /// output is the built-in speaker.
    pub fn has_feedback_risk(&self, input: Option<&str>) -> bool {
        if let Some(id) = input {
            if let Some(device) = self.input_by_id(id) {
                if device.kind.is_external_input() {
                    return false;
                }
            }
        }
        !self
            .enumerator
            .outputs()
            .iter()
            .any(|d| d.kind.is_isolated_output())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FakeEnumerator {
        inputs: Arc<Mutex<Vec<DeviceInfo>>>,
        outputs: Vec<DeviceInfo>,
    }

    impl FakeEnumerator {
        fn new(inputs: Vec<DeviceInfo>, outputs: Vec<DeviceInfo>) -> Self {
            Self {
                inputs: Arc::new(Mutex::new(inputs)),
                outputs,
            }
        }
    }

    impl DeviceEnumerator for FakeEnumerator {
        fn inputs(&self) -> Vec<DeviceInfo> {
            self.inputs.lock().unwrap().clone()
        }

        fn outputs(&self) -> Vec<DeviceInfo> {
            self.outputs.clone()
        }
    }

    fn device(id: &str, kind: DeviceKind) -> DeviceInfo {
        DeviceInfo {
            id: id.to_string(),
            kind,
            display_name: id.to_string(),
        }
    }

    struct CountingObserver {
        calls: AtomicUsize,
    }

    impl DeviceObserver for CountingObserver {
        fn on_devices_changed(&self, _inputs: &[DeviceInfo]) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_external_input_classification() {
        assert!(DeviceKind::UsbDevice.is_external_input());
        assert!(DeviceKind::UsbHeadset.is_external_input());
        assert!(DeviceKind::UsbAccessory.is_external_input());
        assert!(DeviceKind::WiredHeadset.is_external_input());
        assert!(!DeviceKind::BuiltinMic.is_external_input());
        assert!(!DeviceKind::BluetoothA2dp.is_external_input());
    }

    #[test]
    fn test_classify_device_name() {
        assert_eq!(
            classify_device_name("bluez_output.AA_BB.a2dp-sink", false),
            DeviceKind::BluetoothA2dp
        );
        assert_eq!(
            classify_device_name("bluez_input.handsfree_head_unit", true),
            DeviceKind::BluetoothSco
        );
        assert_eq!(
            classify_device_name("USB Audio Device Analog Stereo", true),
            DeviceKind::UsbDevice
        );
        assert_eq!(
            classify_device_name("Built-in Audio Analog Stereo", true),
            DeviceKind::BuiltinMic
        );
        assert_eq!(
            classify_device_name("Built-in Audio Analog Stereo", false),
            DeviceKind::BuiltinSpeaker
        );
    }

    #[test]
    fn test_output_routing_preference_order() {
        let registry = DeviceRegistry::new(Box::new(FakeEnumerator::new(
            vec![],
            vec![
                device("speaker", DeviceKind::BuiltinSpeaker),
                device("wired", DeviceKind::WiredHeadphones),
                device("bt", DeviceKind::BluetoothA2dp),
            ],
        )));
        assert_eq!(
            registry.preferred_monitor_output(None).unwrap().id,
            "bt"
        );
    }

    #[test]
    fn test_output_routing_excludes_input_device() {
        let registry = DeviceRegistry::new(Box::new(FakeEnumerator::new(
            vec![],
            vec![
                device("usb-combo", DeviceKind::BluetoothA2dp),
                device("speaker", DeviceKind::BuiltinSpeaker),
            ],
        )));
        let picked = registry.preferred_monitor_output(Some("usb-combo")).unwrap();
        assert_eq!(picked.id, "speaker");
    }

    #[test]
    fn test_feedback_risk_only_with_builtin_everything() {
        let speaker_only = DeviceRegistry::new(Box::new(FakeEnumerator::new(
            vec![device("mic", DeviceKind::BuiltinMic)],
            vec![device("speaker", DeviceKind::BuiltinSpeaker)],
        )));
        assert!(speaker_only.has_feedback_risk(None));

        let with_headphones = DeviceRegistry::new(Box::new(FakeEnumerator::new(
            vec![device("mic", DeviceKind::BuiltinMic)],
            vec![
                device("speaker", DeviceKind::BuiltinSpeaker),
                device("wired", DeviceKind::WiredHeadphones),
            ],
        )));
        assert!(!with_headphones.has_feedback_risk(None));

        let usb_input = DeviceRegistry::new(Box::new(FakeEnumerator::new(
            vec![device("usb", DeviceKind::UsbDevice)],
            vec![device("speaker", DeviceKind::BuiltinSpeaker)],
        )));
        assert!(!usb_input.has_feedback_risk(Some("usb")));
    }

    #[test]
    fn test_refresh_notifies_on_change_only() {
        let enumerator = FakeEnumerator::new(vec![device("mic", DeviceKind::BuiltinMic)], vec![]);
        let inputs = Arc::clone(&enumerator.inputs);
        let registry = DeviceRegistry::new(Box::new(enumerator));

        let observer = Arc::new(CountingObserver {
            calls: AtomicUsize::new(0),
        });
        registry.subscribe(Arc::downgrade(&observer) as Weak<dyn DeviceObserver>);

        // No change: no notification.
        registry.refresh().unwrap();
        assert_eq!(observer.calls.load(Ordering::SeqCst), 0);

        // Plug in a USB device.
        inputs
            .lock()
            .unwrap()
            .push(device("usb", DeviceKind::UsbDevice));
        registry.refresh().unwrap();
        assert_eq!(observer.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dead_observers_are_pruned() {
        let enumerator = FakeEnumerator::new(vec![], vec![]);
        let inputs = Arc::clone(&enumerator.inputs);
        let registry = DeviceRegistry::new(Box::new(enumerator));

        let observer = Arc::new(CountingObserver {
            calls: AtomicUsize::new(0),
        });
        registry.subscribe(Arc::downgrade(&observer) as Weak<dyn DeviceObserver>);
        drop(observer);

        inputs
            .lock()
            .unwrap()
            .push(device("usb", DeviceKind::UsbDevice));
        // A dropped observer must not keep anything alive or panic.
        registry.refresh().unwrap();
        assert!(registry.observers.lock().unwrap().is_empty());
    }

    #[test]
    fn test_input_by_id() {
        let registry = DeviceRegistry::new(Box::new(FakeEnumerator::new(
            vec![
                device("mic", DeviceKind::BuiltinMic),
                device("usb", DeviceKind::UsbDevice),
            ],
            vec![],
        )));
        assert_eq!(registry.input_by_id("usb").unwrap().kind, DeviceKind::UsbDevice);
        assert!(registry.input_by_id("missing").is_none());
        assert_eq!(registry.external_inputs().len(), 1);
    }
}
