// Copyright 2024 Cosmian Tech SAS
// Changes made to the original code are
// licensed under the Business Source License version 1.1.
//
// Original code:
// Copyright 2022 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

pub mod mechanism;
pub mod output;

/// Copy `value` into a fixed-size, blank padded `CK_UTF8CHAR` field,
/// truncating it when too long.
#[must_use]
pub fn padded<const N: usize>(value: &str) -> [u8; N] {
    let mut field = [b' '; N];
    let bytes = value.as_bytes();
    let len = bytes.len().min(N);
    field[..len].copy_from_slice(&bytes[..len]);
    field
}

#[cfg(test)]
mod tests {
    use super::padded;

    #[test]
    fn pads_and_truncates() {
        assert_eq!(&padded::<8>("HSM"), b"HSM     ");
        assert_eq!(&padded::<4>("SmartCard"), b"Smar");
    }
}
