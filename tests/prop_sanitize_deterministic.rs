// Copyright (c) 2026 The Collector Authors
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]

use std::net::Ipv4Addr;

use collector::sanitize::{scrub_ipv4, scrub_port};
use proptest::prelude::*;

proptest! {
    #[test]
    fn prop_ipv4_scrub_deterministic_and_in_range(
        octets in prop::collection::vec(any::<u8>(), 4..=4),
        fp in prop::collection::vec(any::<u8>(), 20..=20),
        secret in prop::collection::vec(any::<u8>(), 83..=83),
    ) {
        let ip = Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]);
        let a = scrub_ipv4(ip, &fp, &secret).unwrap();
        let b = scrub_ipv4(ip, &fp, &secret).unwrap();
        prop_assert_eq!(a, b);
        prop_assert_eq!(a.octets()[0], 10);
    }

    #[test]
    fn prop_port_scrub_deterministic_and_in_range(
        port in 1u16..=u16::MAX,
        fp in prop::collection::vec(any::<u8>(), 20..=20),
        secret in prop::collection::vec(any::<u8>(), 83..=83),
    ) {
        let a = scrub_port(port, &fp, &secret).unwrap();
        let b = scrub_port(port, &fp, &secret).unwrap();
        prop_assert_eq!(a, b);
        prop_assert!(a >= 0xC000);
    }
}
