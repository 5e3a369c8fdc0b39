use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Business data carried by a process instance
///
/// This is a wrapper around a JSON value. Handlers receive a copy of the
/// current packet and may hand back a replacement; `merge` folds a partial
/// update into an existing object packet.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct DataPacket {
    /// The inner JSON value
    pub value: serde_json::Value,
}

impl DataPacket {
    /// Create a new data packet from a JSON value
    #[inline]
    pub fn new(value: serde_json::Value) -> Self {
        Self { value }
    }

    /// Create a null data packet
    #[inline]
    pub fn null() -> Self {
        Self {
            value: serde_json::Value::Null,
        }
    }

    /// Create an empty object packet, the natural shape for business data
    #[inline]
    pub fn object() -> Self {
        Self {
            value: serde_json::Value::Object(serde_json::Map::new()),
        }
    }

    /// Get the inner JSON value
    #[inline]
    pub fn as_value(&self) -> &serde_json::Value {
        &self.value
    }

    /// Get a mutable reference to the inner JSON value
    #[inline]
    pub fn as_value_mut(&mut self) -> &mut serde_json::Value {
        &mut self.value
    }

    /// Take ownership of the inner JSON value
    #[inline]
    pub fn into_value(self) -> serde_json::Value {
        self.value
    }

    /// Check if the data packet is null
    #[inline]
    pub fn is_null(&self) -> bool {
        self.value.is_null()
    }

    /// Try to view the data packet as a string
    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        self.value.as_str()
    }

    /// Try to view the data packet as a number
    #[inline]
    pub fn as_f64(&self) -> Option<f64> {
        self.value.as_f64()
    }

    /// Try to view the data packet as a boolean
    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        self.value.as_bool()
    }

    /// Try to view the data packet as an object
    #[inline]
    pub fn as_object(&self) -> Option<&serde_json::Map<String, serde_json::Value>> {
        self.value.as_object()
    }

    /// Read a single top-level property
    pub fn get_property(&self, key: &str) -> Option<&serde_json::Value> {
        self.value.as_object().and_then(|obj| obj.get(key))
    }

    /// Write a single top-level property, turning a non-object packet
    /// into an object first
    pub fn set_property(&mut self, key: &str, value: serde_json::Value) {
        if !self.value.is_object() {
            self.value = serde_json::Value::Object(serde_json::Map::new());
        }
        if let Some(obj) = self.value.as_object_mut() {
            obj.insert(key.to_string(), value);
        }
    }

    /// Fold another packet into this one. Object-into-object merges
    /// top-level keys; a null update is a no-op; anything else replaces
    /// the packet wholesale.
    pub fn merge(&mut self, update: DataPacket) {
        if update.is_null() {
            return;
        }
        match (self.value.as_object_mut(), update.value) {
            (Some(target), serde_json::Value::Object(source)) => {
                for (key, value) in source {
                    target.insert(key, value);
                }
            }
            (_, replacement) => self.value = replacement,
        }
    }

    /// Try to convert the data packet to a specific type
    pub fn to<T>(&self) -> Result<T, serde_json::Error>
    where
        T: DeserializeOwned,
    {
        serde_json::from_value(self.value.clone())
    }

    /// Create a data packet from a serializable value
    pub fn from<T>(value: &T) -> Result<Self, serde_json::Error>
    where
        T: Serialize,
    {
        Ok(Self::new(serde_json::to_value(value)?))
    }
}

impl Default for DataPacket {
    fn default() -> Self {
        Self::object()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_data_packet_creation() {
        let packet = DataPacket::new(json!({"name": "test"}));
        assert_eq!(packet.as_value()["name"], "test");
    }

    #[test]
    fn test_data_packet_null_and_object() {
        assert!(DataPacket::null().is_null());
        assert!(DataPacket::object().as_object().unwrap().is_empty());
        assert_eq!(DataPacket::default(), DataPacket::object());
    }

    #[test]
    fn test_property_access() {
        let mut packet = DataPacket::object();
        packet.set_property("count", json!(3));
        assert_eq!(packet.get_property("count"), Some(&json!(3)));
        assert_eq!(packet.get_property("missing"), None);
    }

    #[test]
    fn test_set_property_replaces_non_object() {
        let mut packet = DataPacket::new(json!("scalar"));
        packet.set_property("key", json!(true));
        assert_eq!(packet.get_property("key"), Some(&json!(true)));
    }

    #[test]
    fn test_merge_objects() {
        let mut packet = DataPacket::new(json!({"a": 1, "b": 2}));
        packet.merge(DataPacket::new(json!({"b": 3, "c": 4})));
        assert_eq!(*packet.as_value(), json!({"a": 1, "b": 3, "c": 4}));
    }

    #[test]
    fn test_merge_null_is_noop() {
        let mut packet = DataPacket::new(json!({"a": 1}));
        packet.merge(DataPacket::null());
        assert_eq!(*packet.as_value(), json!({"a": 1}));
    }

    #[test]
    fn test_merge_scalar_replaces() {
        let mut packet = DataPacket::new(json!({"a": 1}));
        packet.merge(DataPacket::new(json!(42)));
        assert_eq!(*packet.as_value(), json!(42));
    }

    #[test]
    fn test_serialization_is_transparent() {
        let packet = DataPacket::new(json!({"nested": ["array", 123]}));
        let serialized = serde_json::to_string(&packet).unwrap();
        assert_eq!(serialized, r#"{"nested":["array",123]}"#);

        let deserialized: DataPacket = serde_json::from_str(&serialized).unwrap();
        assert_eq!(packet, deserialized);
    }

    #[test]
    fn test_typed_conversion() {
        #[derive(Serialize, Deserialize, PartialEq, Debug)]
        struct Order {
            id: u32,
        }

        let packet = DataPacket::from(&Order { id: 7 }).unwrap();
        let order: Order = packet.to().unwrap();
        assert_eq!(order, Order { id: 7 });
    }
}
