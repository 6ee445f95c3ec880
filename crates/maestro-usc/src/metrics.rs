use prometheus::{Encoder, IntCounter, Registry, TextEncoder};

#[derive(Clone)]
pub struct TransferMetrics {
    pub control_out: IntCounter,
    pub control_in: IntCounter,
    pub parameter_writes: IntCounter,
    pub script_blocks: IntCounter,
}

#[derive(Clone)]
pub struct MetricsHub {
    pub registry: Registry,
    pub usb: TransferMetrics,
}

fn counter(name: &str, help: &str) -> Result<IntCounter, String> {
    IntCounter::new(name, help).map_err(|e| format!("metrics init error: {e}"))
}

impl MetricsHub {
    pub fn new() -> Result<Self, String> {
        let registry = Registry::new();
        let usb = TransferMetrics {
            control_out: counter(
                "maestro_control_out_total",
                "Control transfers sent to the device",
            )?,
            control_in: counter(
                "maestro_control_in_total",
                "Control transfers read from the device",
            )?,
            parameter_writes: counter(
                "maestro_parameter_writes_total",
                "Settings parameters written",
            )?,
            script_blocks: counter(
                "maestro_script_blocks_total",
                "Script memory blocks written",
            )?,
        };
        for c in [
            &usb.control_out,
            &usb.control_in,
            &usb.parameter_writes,
            &usb.script_blocks,
        ] {
            let _ = registry.register(Box::new(c.clone()));
        }
        Ok(Self { registry, usb })
    }

    pub fn encode_text(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            return format!("error encoding metrics: {e}");
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_show_up_in_text_output() {
        let hub = MetricsHub::new().unwrap();
        hub.usb.parameter_writes.inc_by(3);
        let text = hub.encode_text();
        assert!(text.contains("maestro_parameter_writes_total 3"));
        assert!(text.contains("maestro_control_out_total 0"));
    }
}
