//! 通道写入属性测试

use neopia_sdk::driver::{Channel, ChannelSpec, Role};
use neopia_sdk::prelude::*;
use proptest::prelude::*;

fn integer_channel(min: f64, max: f64) -> Channel {
    Channel::new(
        ChannelSpec::new(0x0040_0001, "Motor", Role::Effector, ValueKind::Integer).range(min, max),
    )
}

proptest! {
    #[test]
    fn integer_writes_stay_in_range(value in -10_000.0f64..10_000.0, min in -500i32..0, max in 0i32..500) {
        let channel = integer_channel(f64::from(min), f64::from(max));
        channel.write(value).unwrap();
        let stored = channel.read().as_i64();
        prop_assert!(stored >= i64::from(min) && stored <= i64::from(max));
        if value >= f64::from(min) && value <= f64::from(max) {
            prop_assert_eq!(stored, value.trunc() as i64);
        }
    }

    #[test]
    fn float_writes_keep_fraction(value in -1.0f64..1.0) {
        let channel = Channel::new(
            ChannelSpec::new(0x0040_0002, "Gain", Role::Command, ValueKind::Float).range(-1.0, 1.0),
        );
        channel.write(value).unwrap();
        prop_assert_eq!(channel.read(), Value::Float(value));
    }

    #[test]
    fn sensor_channels_reject_writes(value in any::<i32>()) {
        let channel = Channel::new(
            ChannelSpec::new(0x0040_0003, "Light", Role::Sensor, ValueKind::Integer).initial(7),
        );
        prop_assert!(matches!(channel.write(value), Err(WriteError::ReadOnly(_))));
        prop_assert_eq!(channel.read(), Value::Integer(7));
    }
}
