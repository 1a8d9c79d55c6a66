//! Field-level merge rules
//!
//! Absent means "not measured", never "cleared": an update can only add or
//! replace values. Nested groups merge field by field, so an update carrying
//! only `env.temp` leaves `env.humid` alone.

use telecast_schemas::record::{
    Battery, Environment, GatewayReception, Geiger, Location, Particulate, ServiceInfo,
};
use telecast_schemas::SensorRecord;

use super::{Category, Mergeable};

/// Copy each listed `Option` field from `$src` to `$dst` when it is `Some`
macro_rules! overlay_fields {
    ($dst:expr, $src:expr; $($field:ident),+ $(,)?) => {
        $(
            if $src.$field.is_some() {
                $dst.$field = $src.$field.clone();
            }
        )+
    };
}
pub(crate) use overlay_fields;

/// Field-wise overlay for one record group
pub trait Overlay: Clone {
    /// Copy every present field of `update` over `self`
    fn overlay(&mut self, update: &Self);
}

macro_rules! impl_overlay {
    ($ty:ty { $($field:ident),+ $(,)? }) => {
        impl Overlay for $ty {
            fn overlay(&mut self, update: &Self) {
                overlay_fields!(self, update; $($field),+);
            }
        }
    };
}

impl_overlay!(Location { lat, lon, alt });
impl_overlay!(Environment { temp, humid, press });
impl_overlay!(Battery { voltage, soc, current });
impl_overlay!(Geiger { cpm0, cpm1 });
impl_overlay!(Particulate { pm01_0, pm02_5, pm10_0, csecs });
impl_overlay!(GatewayReception { id, lat, lon, alt, snr, location });
impl_overlay!(ServiceInfo { uploaded_at, transport, checksum, sequence });

/// Merge an optional group: fill it when absent, overlay it when present
pub fn overlay_group<T: Overlay>(dst: &mut Option<T>, src: &Option<T>) {
    let Some(update) = src else {
        return;
    };
    if let Some(current) = dst.as_mut() {
        current.overlay(update);
    } else {
        *dst = Some(update.clone());
    }
}

impl Mergeable for SensorRecord {
    fn overlay(&mut self, update: &Self) {
        overlay_fields!(self, update; device_id, device_sn, device_type, captured_at);
        overlay_group(&mut self.loc, &update.loc);
        overlay_group(&mut self.env, &update.env);
        overlay_group(&mut self.bat, &update.bat);
        overlay_group(&mut self.geiger, &update.geiger);
        overlay_group(&mut self.pms, &update.pms);
        overlay_group(&mut self.opc, &update.opc);
        overlay_group(&mut self.gateway, &update.gateway);
        overlay_group(&mut self.service, &update.service);
    }

    fn project(&self, category: Category) -> Self {
        let mut out = SensorRecord::default();
        match category {
            Category::Location => out.loc = self.loc.clone(),
            Category::Geiger => out.geiger = self.geiger.clone(),
            Category::Pms => out.pms = self.pms.clone(),
            Category::Opc => out.opc = self.opc.clone(),
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_fields_never_erase() {
        let mut current = SensorRecord {
            loc: Some(Location {
                lat: Some(37.5),
                lon: Some(140.9),
                alt: None,
            }),
            ..Default::default()
        };
        let update = SensorRecord {
            env: Some(Environment {
                temp: Some(21.0),
                ..Default::default()
            }),
            ..Default::default()
        };

        current.overlay(&update);
        assert_eq!(current.loc.as_ref().unwrap().lat, Some(37.5));
        assert_eq!(current.loc.as_ref().unwrap().lon, Some(140.9));
        assert_eq!(current.env.as_ref().unwrap().temp, Some(21.0));
        assert_eq!(current.env.as_ref().unwrap().humid, None);
    }

    #[test]
    fn groups_merge_field_by_field() {
        let mut current = SensorRecord {
            geiger: Some(Geiger {
                cpm0: Some(10),
                cpm1: Some(11),
            }),
            ..Default::default()
        };
        let update = SensorRecord {
            geiger: Some(Geiger {
                cpm0: Some(20),
                cpm1: None,
            }),
            ..Default::default()
        };

        current.overlay(&update);
        assert_eq!(
            current.geiger,
            Some(Geiger {
                cpm0: Some(20),
                cpm1: Some(11)
            })
        );
    }

    #[test]
    fn projection_keeps_one_category() {
        let record = SensorRecord {
            device_id: Some(1),
            loc: Some(Location::default()),
            geiger: Some(Geiger {
                cpm0: Some(5),
                cpm1: None,
            }),
            ..Default::default()
        };

        let geiger = record.project(Category::Geiger);
        assert_eq!(geiger.geiger, record.geiger);
        assert!(geiger.loc.is_none());
        assert!(geiger.device_id.is_none());
    }
}
