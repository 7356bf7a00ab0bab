//! Lazily computed properties of a found method, used by format strings and
//! user predicates.

use std::cell::RefCell;
use std::collections::HashMap;

use rowframe::falseness::{CourseFalseness, FalseCourseTable};
use rowframe::{Bell, Method, Stage};

use crate::music::MusicAnalysis;
use crate::params::SearchParams;

/// A found method, its payload (name, when filtering a library), and a
/// cache of its computed properties.
pub struct MethodProperties<'a> {
    method: &'a Method,
    payload: String,
    params: &'a SearchParams,
    search_count: u64,
    cache: RefCell<HashMap<(usize, String), String>>,
}

impl<'a> MethodProperties<'a> {
    pub fn new(method: &'a Method, payload: String, params: &'a SearchParams) -> Self {
        MethodProperties {
            method,
            payload,
            params,
            search_count: 0,
            cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn with_search_count(mut self, count: u64) -> Self {
        self.search_count = count;
        self
    }

    pub fn method(&self) -> &Method {
        self.method
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Fetches a property, computing and caching it on first use.  `num` is
    /// the optional number prefix of the variable (`$4P` has `num == 4`).
    pub fn get_property(&self, num: usize, name: &str) -> Result<String, String> {
        let key = (num, name.to_owned());
        if let Some(v) = self.cache.borrow().get(&key) {
            return Ok(v.clone());
        }
        let value = self.compute(num, name)?;
        self.cache.borrow_mut().insert(key, value.clone());
        Ok(value)
    }

    fn compute(&self, num: usize, name: &str) -> Result<String, String> {
        let m = self.method;
        Ok(match name {
            "b" => m.stage().num_bells().to_string(),
            "n" => self.payload.clone(),
            "p" => m.format_pn(),
            "q" => rowframe::PnBlock::parse(&m.format_pn(), m.stage())
                .ok()
                .and_then(|b| b.format_folded())
                .unwrap_or_else(|| m.format_pn()),
            "l" => m.lead_head().to_string(),
            "L" => m.lead_len().to_string(),
            "h" => m.half_lead_head().to_string(),
            "C" => m.class().name().to_owned(),
            "S" => m.symmetry_string(),
            "D" => m.old_lhcode().to_owned(),
            "c" => m
                .coursing_order()
                .ok_or_else(|| "unable to get a tenors together coursing order".to_owned())?,
            "F" => {
                let flags = if m.stage() == Stage::MAJOR {
                    CourseFalseness::default()
                } else {
                    CourseFalseness {
                        tenors_together: true,
                        ..Default::default()
                    }
                };
                FalseCourseTable::new(m, flags).symbols()
            }
            "M" => MusicAnalysis::from_params(self.params)
                .map_err(|e| e.to_string())?
                .analyse(m)
                .to_string(),
            "P" => {
                // The path of bell `num` (1-indexed; the treble by default)
                let bell = Bell::from_number(num.max(1))
                    .filter(|b| b.index() < m.stage().num_bells())
                    .ok_or_else(|| format!("bell {} is outside the stage", num))?;
                let mut path = String::new();
                let mut row = rowframe::RowBuf::rounds(m.stage());
                path.push(Bell::from_index(bell.index()).unwrap().name());
                for c in m.changes() {
                    c.permute(&mut row);
                    let place = row.place_of(bell).unwrap();
                    path.push(Bell::from_index(place).unwrap().name());
                }
                path
            }
            "#" => self.search_count.to_string(),
            _ => return Err(format!("unknown property '${}'", name)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowframe::Stage;

    #[test]
    fn basic_properties() {
        let mut params = SearchParams::new(Stage::MINOR);
        params.validate().unwrap();
        let m = Method::parse("&x16x16x16,12", Stage::MINOR).unwrap();
        let props = MethodProperties::new(&m, "Plain Bob Minor".to_owned(), &params);

        assert_eq!(props.get_property(0, "b").unwrap(), "6");
        assert_eq!(props.get_property(0, "L").unwrap(), "12");
        assert_eq!(props.get_property(0, "l").unwrap(), "135264");
        assert_eq!(props.get_property(0, "n").unwrap(), "Plain Bob Minor");
        assert_eq!(props.get_property(0, "C").unwrap(), "plain");
        assert_eq!(props.get_property(0, "S").unwrap(), "P");
        assert_eq!(props.get_property(0, "D").unwrap(), "G");
        assert!(props.get_property(0, "Z").is_err());
    }

    #[test]
    fn treble_path_property() {
        let mut params = SearchParams::new(Stage::MINOR);
        params.validate().unwrap();
        let m = Method::parse("&x16x16x16,12", Stage::MINOR).unwrap();
        let props = MethodProperties::new(&m, String::new(), &params);
        // Plain hunt: up to the back and down again
        assert_eq!(props.get_property(1, "P").unwrap(), "1234566543211");
    }
}
