//! Bindings for the `Open_vSwitch` database tables the reconciliation
//! commands touch.

use std::collections::BTreeMap;

use super::{FieldSpec, TableBinding, TypedRow, TypedTable};
use crate::protocol::OvsdbResult;
use crate::schema::{DatabaseSchema, SchemaVersion};
use crate::value::{Atom, Value};

pub static BRIDGE: TableBinding = TableBinding {
    table: "Bridge",
    fields: &[
        FieldSpec::new("name"),
        FieldSpec::new("ports"),
        FieldSpec::new("protocols").since(SchemaVersion::new(6, 11, 1)),
        FieldSpec::new("fail_mode"),
        FieldSpec::new("flood_vlans"),
        FieldSpec::new("datapath_type"),
        FieldSpec::new("external_ids"),
    ],
};

pub static PORT: TableBinding = TableBinding {
    table: "Port",
    fields: &[
        FieldSpec::new("name"),
        FieldSpec::new("interfaces"),
        FieldSpec::new("external_ids"),
    ],
};

pub static INTERFACE: TableBinding = TableBinding {
    table: "Interface",
    fields: &[
        FieldSpec::new("name"),
        FieldSpec::new("type"),
        FieldSpec::new("ofport"),
        FieldSpec::new("ofport_request").since(SchemaVersion::new(7, 2, 0)),
        FieldSpec::new("options"),
        FieldSpec::new("external_ids"),
    ],
};

pub static OPEN_VSWITCH: TableBinding = TableBinding {
    table: "Open_vSwitch",
    fields: &[
        FieldSpec::new("bridges"),
        FieldSpec::new("ovs_version"),
        FieldSpec::new("external_ids"),
    ],
};

macro_rules! typed_table {
    ($(#[$meta:meta])* $name:ident, $binding:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone)]
        pub struct $name(TypedRow);

        impl TypedTable for $name {
            const BINDING: &'static TableBinding = &$binding;

            fn from_typed(row: TypedRow) -> Self {
                $name(row)
            }

            fn typed(&self) -> &TypedRow {
                &self.0
            }

            fn typed_mut(&mut self) -> &mut TypedRow {
                &mut self.0
            }
        }
    };
}

typed_table!(
    /// Row of the `Bridge` table.
    Bridge,
    BRIDGE
);
typed_table!(
    /// Row of the `Port` table.
    Port,
    PORT
);
typed_table!(
    /// Row of the `Interface` table.
    Interface,
    INTERFACE
);
typed_table!(
    /// The single row of the `Open_vSwitch` root table.
    OpenVSwitch,
    OPEN_VSWITCH
);

fn string_map<'a>(entries: impl IntoIterator<Item = (&'a str, &'a str)>) -> Value {
    Value::map(entries)
}

fn strings_of(value: &Value) -> Vec<String> {
    value
        .atoms()
        .filter_map(Atom::as_str)
        .map(String::from)
        .collect()
}

impl Bridge {
    /// Bridge with `name` set, as used for `where name == ..` clauses.
    pub fn named(schema: &DatabaseSchema, name: &str) -> OvsdbResult<Self> {
        let mut bridge = Bridge::new(schema)?;
        bridge.set_name(name)?;
        Ok(bridge)
    }

    pub fn set_name(&mut self, name: &str) -> OvsdbResult<&mut Self> {
        self.0.set("name", name)?;
        Ok(self)
    }

    pub fn name(&self) -> OvsdbResult<Option<String>> {
        self.0.get_str("name")
    }

    pub fn set_ports(&mut self, ports: impl IntoIterator<Item = Atom>) -> OvsdbResult<&mut Self> {
        self.0.set("ports", Value::set(ports))?;
        Ok(self)
    }

    pub fn set_protocols<'a>(
        &mut self,
        protocols: impl IntoIterator<Item = &'a str>,
    ) -> OvsdbResult<&mut Self> {
        self.0.set("protocols", Value::set(protocols))?;
        Ok(self)
    }

    pub fn protocols(&self) -> OvsdbResult<Vec<String>> {
        Ok(strings_of(&self.0.get("protocols")?))
    }

    /// `None` clears the column.
    pub fn set_fail_mode(&mut self, mode: Option<&str>) -> OvsdbResult<&mut Self> {
        let value = mode.map_or_else(Value::empty_set, Value::from);
        self.0.set("fail_mode", value)?;
        Ok(self)
    }

    pub fn fail_mode(&self) -> OvsdbResult<Option<String>> {
        self.0.get_str("fail_mode")
    }

    pub fn set_flood_vlans(&mut self, vlans: impl IntoIterator<Item = i64>) -> OvsdbResult<&mut Self> {
        self.0.set("flood_vlans", Value::set(vlans))?;
        Ok(self)
    }

    pub fn set_datapath_type(&mut self, datapath_type: &str) -> OvsdbResult<&mut Self> {
        self.0.set("datapath_type", datapath_type)?;
        Ok(self)
    }

    pub fn set_external_ids<'a>(
        &mut self,
        ids: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> OvsdbResult<&mut Self> {
        self.0.set("external_ids", string_map(ids))?;
        Ok(self)
    }
}

impl Port {
    pub fn set_name(&mut self, name: &str) -> OvsdbResult<&mut Self> {
        self.0.set("name", name)?;
        Ok(self)
    }

    pub fn name(&self) -> OvsdbResult<Option<String>> {
        self.0.get_str("name")
    }

    pub fn set_interfaces(
        &mut self,
        interfaces: impl IntoIterator<Item = Atom>,
    ) -> OvsdbResult<&mut Self> {
        self.0.set("interfaces", Value::set(interfaces))?;
        Ok(self)
    }
}

impl Interface {
    pub fn set_name(&mut self, name: &str) -> OvsdbResult<&mut Self> {
        self.0.set("name", name)?;
        Ok(self)
    }

    pub fn name(&self) -> OvsdbResult<Option<String>> {
        self.0.get_str("name")
    }

    pub fn set_type(&mut self, interface_type: &str) -> OvsdbResult<&mut Self> {
        self.0.set("type", interface_type)?;
        Ok(self)
    }

    pub fn set_ofport(&mut self, ofport: i64) -> OvsdbResult<&mut Self> {
        self.0.set("ofport", Value::set([ofport]))?;
        Ok(self)
    }

    pub fn set_ofport_request(&mut self, ofport: i64) -> OvsdbResult<&mut Self> {
        self.0.set("ofport_request", Value::set([ofport]))?;
        Ok(self)
    }

    pub fn set_options(&mut self, options: &BTreeMap<String, String>) -> OvsdbResult<&mut Self> {
        self.0.set(
            "options",
            string_map(options.iter().map(|(k, v)| (k.as_str(), v.as_str()))),
        )?;
        Ok(self)
    }
}

impl OpenVSwitch {
    pub fn set_bridges(&mut self, bridges: impl IntoIterator<Item = Atom>) -> OvsdbResult<&mut Self> {
        self.0.set("bridges", Value::set(bridges))?;
        Ok(self)
    }

    pub fn ovs_version(&self) -> OvsdbResult<Option<String>> {
        self.0.get_str("ovs_version")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::OvsdbError;
    use serde_json::json;

    fn schema(version: &str) -> DatabaseSchema {
        DatabaseSchema::from_json(&json!({
            "name": "Open_vSwitch",
            "version": version,
            "tables": {
                "Bridge": {"columns": {
                    "name": {"type": "string", "mutable": false},
                    "ports": {"type": {"key": {"type": "uuid", "refTable": "Port"}, "min": 0, "max": "unlimited"}},
                    "protocols": {"type": {"key": {"type": "string",
                        "enum": ["set", ["OpenFlow10", "OpenFlow13"]]}, "min": 0, "max": "unlimited"}},
                    "fail_mode": {"type": {"key": {"type": "string",
                        "enum": ["set", ["secure", "standalone"]]}, "min": 0, "max": 1}},
                    "flood_vlans": {"type": {"key": {"type": "integer", "minInteger": 0, "maxInteger": 4095},
                        "min": 0, "max": 4096}}
                }},
                "Interface": {"columns": {
                    "name": {"type": "string"},
                    "ofport": {"type": {"key": "integer", "min": 0, "max": 1}},
                    "ofport_request": {"type": {"key": "integer", "min": 0, "max": 1}}
                }}
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_bridge_accessors() {
        let schema = schema("7.6.0");
        let mut bridge = Bridge::named(&schema, "br-test").unwrap();
        bridge
            .set_fail_mode(Some("secure"))
            .unwrap()
            .set_flood_vlans([100, 101, 4001])
            .unwrap()
            .set_protocols(["OpenFlow13"])
            .unwrap();
        assert_eq!(bridge.name().unwrap().as_deref(), Some("br-test"));
        assert_eq!(bridge.fail_mode().unwrap().as_deref(), Some("secure"));
        assert_eq!(bridge.protocols().unwrap(), vec!["OpenFlow13".to_string()]);

        bridge.set_fail_mode(None).unwrap();
        assert_eq!(bridge.fail_mode().unwrap(), None);
    }

    #[test]
    fn test_bridge_constraints() {
        let schema = schema("7.6.0");
        let mut bridge = Bridge::new(&schema).unwrap();
        assert!(matches!(
            bridge.set_fail_mode(Some("bogus")),
            Err(OvsdbError::ConstraintViolation { .. })
        ));
        assert!(bridge.set_flood_vlans([5000]).is_err());
        // datapath_type is bound but absent from this schema
        assert!(matches!(
            bridge.set_datapath_type("netdev"),
            Err(OvsdbError::SchemaVersionMismatch { .. })
        ));
    }

    #[test]
    fn test_interface_ofport_request_version_gate() {
        let old = schema("7.1.0");
        let mut iface = Interface::new(&old).unwrap();
        iface.set_name("tap0").unwrap().set_ofport(3).unwrap();
        assert!(matches!(
            iface.set_ofport_request(3),
            Err(OvsdbError::SchemaVersionMismatch { .. })
        ));

        let new = schema("7.2.0");
        let mut iface = Interface::new(&new).unwrap();
        assert!(iface.set_ofport_request(3).is_ok());
    }

    #[test]
    fn test_missing_tables() {
        let schema = schema("7.6.0");
        assert!(Port::new(&schema).is_err());
        assert!(OpenVSwitch::new(&schema).is_err());
    }
}
