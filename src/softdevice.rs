//! S132 SoftDevice glue.
//!
//! Brings the stack up and implements the [`GattSetup`] / [`RadioStack`]
//! traits on top of the raw supervisor calls. The stack raises SWI2_EGU2
//! whenever SoC or BLE events are pending; the handler only wakes the
//! dispatcher task.

use core::mem;
use core::ptr;

use embassy_nrf::interrupt;
use embassy_nrf::interrupt::{InterruptExt, Priority};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use nrf_softdevice_s132 as raw;
use static_cell::StaticCell;

use monocle::ble::adv::ADV_DATA_MAX_LEN;
use monocle::ble::stack::{
    BleEvent, CharHandles, CharProps, ConnParams, GattSetup, RadioStack, RawError, SocEvent, Uuid,
    NRF_ERROR_INVALID_STATE, NRF_ERROR_NOT_FOUND, NRF_SUCCESS,
};
use monocle::ble::ConnHandle;
use monocle::config::{
    BLE_MAX_MTU_LENGTH, MAX_WRITE_LENGTH, SD_ATTR_TAB_SIZE, SD_EVENT_LENGTH, SD_HVN_TX_QUEUE_SIZE,
    SD_PERIPH_CONN_COUNT, SD_SERVICE_CHANGED, SD_VS_UUID_COUNT,
};
use monocle::fault::check;
use monocle::FatalFault;

/// Tag tying the connection configuration to the advertising set.
const CONN_CFG_TAG: u8 = 1;

/// Raised from SWI2_EGU2; the dispatcher task waits on it.
pub static STACK_EVENT: Signal<CriticalSectionRawMutex, ()> = Signal::new();

/// Advertising data must outlive the advertising set.
static ADV_DATA: StaticCell<[u8; ADV_DATA_MAX_LEN]> = StaticCell::new();

#[interrupt]
unsafe fn SWI2_EGU2() {
    STACK_EVENT.signal(());
}

extern "C" {
    static __sdata: u32;
}

unsafe extern "C" fn on_stack_assert(id: u32, pc: u32, info: u32) {
    crate::board::fatal(FatalFault::StackAssert { id, pc, info });
}

/// Enable the SoftDevice, apply the BLE configuration, and unmask the
/// event interrupt.
pub fn enable() -> Result<(), FatalFault> {
    let clock = raw::nrf_clock_lf_cfg_t {
        source: raw::NRF_CLOCK_LF_SRC_XTAL as u8,
        rc_ctiv: 0,
        rc_temp_ctiv: 0,
        accuracy: raw::NRF_CLOCK_LF_ACCURACY_10_PPM as u8,
    };
    check(RawError::check(unsafe {
        raw::sd_softdevice_enable(&clock, Some(on_stack_assert))
    }))?;
    check(RawError::check(unsafe {
        raw::sd_power_dcdc_mode_set(raw::NRF_POWER_DCDC_MODES_NRF_POWER_DCDC_ENABLE as u8)
    }))?;

    let ram_base = unsafe { ptr::addr_of!(__sdata) as u32 };

    // SAFETY: every ble_cfg_t below is zero-initialised before the union
    // member in use is filled in.
    unsafe {
        let mut cfg: raw::ble_cfg_t = mem::zeroed();
        cfg.conn_cfg.conn_cfg_tag = CONN_CFG_TAG;
        cfg.conn_cfg.params.gap_conn_cfg.conn_count = SD_PERIPH_CONN_COUNT;
        cfg.conn_cfg.params.gap_conn_cfg.event_length = SD_EVENT_LENGTH;
        cfg_set(raw::BLE_CONN_CFGS_BLE_CONN_CFG_GAP, &cfg, ram_base)?;

        let mut cfg: raw::ble_cfg_t = mem::zeroed();
        cfg.conn_cfg.conn_cfg_tag = CONN_CFG_TAG;
        cfg.conn_cfg.params.gatt_conn_cfg.att_mtu = BLE_MAX_MTU_LENGTH;
        cfg_set(raw::BLE_CONN_CFGS_BLE_CONN_CFG_GATT, &cfg, ram_base)?;

        let mut cfg: raw::ble_cfg_t = mem::zeroed();
        cfg.conn_cfg.conn_cfg_tag = CONN_CFG_TAG;
        cfg.conn_cfg.params.gatts_conn_cfg.hvn_tx_queue_size = SD_HVN_TX_QUEUE_SIZE;
        cfg_set(raw::BLE_CONN_CFGS_BLE_CONN_CFG_GATTS, &cfg, ram_base)?;

        let mut cfg: raw::ble_cfg_t = mem::zeroed();
        cfg.common_cfg.vs_uuid_cfg.vs_uuid_count = SD_VS_UUID_COUNT;
        cfg_set(raw::BLE_COMMON_CFGS_BLE_COMMON_CFG_VS_UUID, &cfg, ram_base)?;

        let mut cfg: raw::ble_cfg_t = mem::zeroed();
        cfg.gap_cfg.role_count_cfg.adv_set_count = 1;
        cfg.gap_cfg.role_count_cfg.periph_role_count = SD_PERIPH_CONN_COUNT;
        cfg.gap_cfg.role_count_cfg.central_role_count = 0;
        cfg.gap_cfg.role_count_cfg.central_sec_count = 0;
        cfg_set(raw::BLE_GAP_CFGS_BLE_GAP_CFG_ROLE_COUNT, &cfg, ram_base)?;

        let mut cfg: raw::ble_cfg_t = mem::zeroed();
        cfg.gatts_cfg.service_changed.set_service_changed(SD_SERVICE_CHANGED as u8);
        cfg_set(raw::BLE_GATTS_CFGS_BLE_GATTS_CFG_SERVICE_CHANGED, &cfg, ram_base)?;

        let mut cfg: raw::ble_cfg_t = mem::zeroed();
        cfg.gatts_cfg.attr_tab_size.attr_tab_size = SD_ATTR_TAB_SIZE;
        cfg_set(raw::BLE_GATTS_CFGS_BLE_GATTS_CFG_ATTR_TAB_SIZE, &cfg, ram_base)?;
    }

    let mut wanted_ram_base = ram_base;
    let ret = unsafe { raw::sd_ble_enable(&mut wanted_ram_base) };
    if wanted_ram_base > ram_base {
        defmt::error!(
            "softdevice: RAM must start at {=u32:#x}, linker has {=u32:#x}",
            wanted_ram_base,
            ram_base
        );
    }
    check(RawError::check(ret))?;

    interrupt::SWI2_EGU2.set_priority(Priority::P6);
    unsafe { interrupt::SWI2_EGU2.enable() };

    defmt::info!("softdevice: enabled, app RAM at {=u32:#x}", ram_base);
    Ok(())
}

#[track_caller]
fn cfg_set(id: u32, cfg: &raw::ble_cfg_t, ram_base: u32) -> Result<(), FatalFault> {
    check(RawError::check(unsafe { raw::sd_ble_cfg_set(id, cfg, ram_base) }))
}

fn ret(code: u32) -> Result<(), RawError> {
    RawError::check(code)
}

fn open_security() -> raw::ble_gap_conn_sec_mode_t {
    // SAFETY: plain bitfield struct.
    let mut mode: raw::ble_gap_conn_sec_mode_t = unsafe { mem::zeroed() };
    mode.set_sm(1);
    mode.set_lv(1);
    mode
}

const EVENT_BUFFER_LEN: usize = mem::size_of::<raw::ble_evt_t>() + BLE_MAX_MTU_LENGTH as usize;

#[repr(C, align(4))]
struct EventBuffer([u8; EVENT_BUFFER_LEN]);

static EVENT_BUFFER: StaticCell<EventBuffer> = StaticCell::new();

/// Handle on the enabled SoftDevice. Only valid after [`enable`] has
/// succeeded.
///
/// Only the handle built with [`Sd132::with_events`] pulls BLE events; the
/// rest issue supervisor calls.
pub struct Sd132 {
    evt: Option<&'static mut EventBuffer>,
}

impl Sd132 {
    pub const fn commands() -> Self {
        Self { evt: None }
    }

    /// The handle owning the event buffer. Panics if called twice.
    pub fn with_events() -> Self {
        Self {
            evt: Some(EVENT_BUFFER.init(EventBuffer([0; EVENT_BUFFER_LEN]))),
        }
    }
}

/// Copy the event at the front of `buf` into an owned [`BleEvent`].
///
/// # Safety
///
/// `buf` must hold an event just returned by `sd_ble_evt_get`.
unsafe fn decode(buf: &EventBuffer) -> BleEvent {
    let evt = &*(buf.0.as_ptr() as *const raw::ble_evt_t);
    let id = evt.header.evt_id as u32;
    let gap = &evt.evt.gap_evt;
    let gatts = &evt.evt.gatts_evt;
    let gap_conn = ConnHandle(gap.conn_handle);
    let gatts_conn = ConnHandle(gatts.conn_handle);

    match id {
        raw::BLE_GAP_EVTS_BLE_GAP_EVT_CONNECTED => BleEvent::Connected { conn: gap_conn },
        raw::BLE_GAP_EVTS_BLE_GAP_EVT_DISCONNECTED => BleEvent::Disconnected {
            conn: gap_conn,
            reason: gap.params.disconnected.reason,
        },
        raw::BLE_GAP_EVTS_BLE_GAP_EVT_PHY_UPDATE_REQUEST => {
            BleEvent::PhyUpdateRequest { conn: gap_conn }
        }
        raw::BLE_GATTS_EVTS_BLE_GATTS_EVT_EXCHANGE_MTU_REQUEST => BleEvent::ExchangeMtuRequest {
            conn: gatts_conn,
            client_rx_mtu: gatts.params.exchange_mtu_request.client_rx_mtu,
        },
        raw::BLE_GATTS_EVTS_BLE_GATTS_EVT_WRITE => {
            let write = &gatts.params.write;
            let data = write.data.as_slice(write.len as usize);
            let keep = data.len().min(MAX_WRITE_LENGTH);
            let mut owned = heapless::Vec::<u8, MAX_WRITE_LENGTH>::new();
            owned.extend(data[..keep].iter().copied());
            BleEvent::Write { conn: gatts_conn, handle: write.handle, data: owned }
        }
        raw::BLE_GATTC_EVTS_BLE_GATTC_EVT_TIMEOUT => BleEvent::GattcTimeout {
            conn: ConnHandle(evt.evt.gattc_evt.conn_handle),
        },
        raw::BLE_GATTS_EVTS_BLE_GATTS_EVT_TIMEOUT => BleEvent::GattsTimeout { conn: gatts_conn },
        raw::BLE_GATTS_EVTS_BLE_GATTS_EVT_SYS_ATTR_MISSING => {
            BleEvent::SysAttrMissing { conn: gatts_conn }
        }
        raw::BLE_GAP_EVTS_BLE_GAP_EVT_SEC_PARAMS_REQUEST => {
            BleEvent::SecParamsRequest { conn: gap_conn }
        }
        raw::BLE_GAP_EVTS_BLE_GAP_EVT_SEC_INFO_REQUEST => {
            BleEvent::SecInfoRequest { conn: gap_conn }
        }
        raw::BLE_GAP_EVTS_BLE_GAP_EVT_SEC_REQUEST => BleEvent::SecRequest { conn: gap_conn },
        raw::BLE_GAP_EVTS_BLE_GAP_EVT_AUTH_KEY_REQUEST => {
            BleEvent::AuthKeyRequest { conn: gap_conn }
        }
        raw::BLE_GAP_EVTS_BLE_GAP_EVT_DATA_LENGTH_UPDATE_REQUEST => {
            BleEvent::DataLengthUpdateRequest { conn: gap_conn }
        }
        raw::BLE_GAP_EVTS_BLE_GAP_EVT_CONN_PARAM_UPDATE_REQUEST => {
            BleEvent::ConnParamUpdateRequest { conn: gap_conn }
        }
        raw::BLE_EVTS_BLE_EVT_USER_MEM_REQUEST => BleEvent::UserMemRequest {
            conn: ConnHandle(evt.evt.common_evt.conn_handle),
        },
        other => BleEvent::Other(other as u16),
    }
}

impl GattSetup for Sd132 {
    fn add_vendor_uuid(&mut self, base: &[u8; 16]) -> Result<u8, RawError> {
        let uuid = raw::ble_uuid128_t { uuid128: *base };
        let mut kind = 0u8;
        ret(unsafe { raw::sd_ble_uuid_vs_add(&uuid, &mut kind) })?;
        Ok(kind)
    }

    fn add_primary_service(&mut self, uuid: Uuid) -> Result<u16, RawError> {
        let uuid = raw::ble_uuid_t { uuid: uuid.short, type_: uuid.kind };
        let mut handle = 0u16;
        ret(unsafe {
            raw::sd_ble_gatts_service_add(raw::BLE_GATTS_SRVC_TYPE_PRIMARY as u8, &uuid, &mut handle)
        })?;
        Ok(handle)
    }

    fn add_characteristic(
        &mut self,
        service: u16,
        uuid: Uuid,
        props: CharProps,
        max_len: u16,
    ) -> Result<CharHandles, RawError> {
        let uuid = raw::ble_uuid_t { uuid: uuid.short, type_: uuid.kind };

        // SAFETY: plain C structs, zero is a valid "unset" for every field.
        let mut char_md: raw::ble_gatts_char_md_t = unsafe { mem::zeroed() };
        let mut attr_md: raw::ble_gatts_attr_md_t = unsafe { mem::zeroed() };
        let mut cccd_md: raw::ble_gatts_attr_md_t = unsafe { mem::zeroed() };

        match props {
            CharProps::Write => {
                char_md.char_props.set_write(1);
                char_md.char_props.set_write_wo_resp(1);
            }
            CharProps::Notify => {
                char_md.char_props.set_notify(1);
                cccd_md.read_perm = open_security();
                cccd_md.write_perm = open_security();
                cccd_md.set_vloc(raw::BLE_GATTS_VLOC_STACK as u8);
                char_md.p_cccd_md = &cccd_md;
            }
        }

        attr_md.read_perm = open_security();
        attr_md.write_perm = open_security();
        attr_md.set_vloc(raw::BLE_GATTS_VLOC_STACK as u8);
        attr_md.set_vlen(1);

        let attr = raw::ble_gatts_attr_t {
            p_uuid: &uuid,
            p_attr_md: &attr_md,
            init_len: 1,
            init_offs: 0,
            max_len,
            p_value: ptr::null_mut(),
        };

        let mut handles: raw::ble_gatts_char_handles_t = unsafe { mem::zeroed() };
        ret(unsafe { raw::sd_ble_gatts_characteristic_add(service, &char_md, &attr, &mut handles) })?;
        Ok(CharHandles { value: handles.value_handle, cccd: handles.cccd_handle })
    }

    fn set_device_name(&mut self, name: &str) -> Result<(), RawError> {
        let perm = open_security();
        ret(unsafe { raw::sd_ble_gap_device_name_set(&perm, name.as_ptr(), name.len() as u16) })
    }

    fn set_preferred_conn_params(&mut self, params: &ConnParams) -> Result<(), RawError> {
        let params = raw::ble_gap_conn_params_t {
            min_conn_interval: params.min_interval,
            max_conn_interval: params.max_interval,
            slave_latency: params.slave_latency,
            conn_sup_timeout: params.sup_timeout,
        };
        ret(unsafe { raw::sd_ble_gap_ppcp_set(&params) })
    }

    fn configure_advertising(&mut self, data: &[u8], interval: u32) -> Result<u8, RawError> {
        let Some(buf) = ADV_DATA.try_init([0; ADV_DATA_MAX_LEN]) else {
            // Already configured once; the stack keeps pointing at the first payload.
            return Err(RawError(NRF_ERROR_INVALID_STATE));
        };
        let len = data.len().min(buf.len());
        buf[..len].copy_from_slice(&data[..len]);

        // SAFETY: zeroed is the documented default for unused fields.
        let mut adv_data: raw::ble_gap_adv_data_t = unsafe { mem::zeroed() };
        adv_data.adv_data = raw::ble_data_t { p_data: buf.as_mut_ptr(), len: len as u16 };

        let mut params: raw::ble_gap_adv_params_t = unsafe { mem::zeroed() };
        params.properties.type_ =
            raw::BLE_GAP_ADV_TYPE_CONNECTABLE_SCANNABLE_UNDIRECTED as u8;
        params.p_peer_addr = ptr::null();
        params.filter_policy = raw::BLE_GAP_ADV_FP_ANY as u8;
        params.interval = interval;
        params.duration = 0;

        let mut handle = raw::BLE_GAP_ADV_SET_HANDLE_NOT_SET as u8;
        ret(unsafe { raw::sd_ble_gap_adv_set_configure(&mut handle, &adv_data, &params) })?;
        Ok(handle)
    }
}

impl RadioStack for Sd132 {
    fn next_soc_event(&mut self) -> Option<SocEvent> {
        let mut id = 0u32;
        if unsafe { raw::sd_evt_get(&mut id) } != NRF_SUCCESS {
            return None;
        }
        Some(match id {
            raw::NRF_SOC_EVTS_NRF_EVT_FLASH_OPERATION_SUCCESS => SocEvent::FlashOperationSuccess,
            raw::NRF_SOC_EVTS_NRF_EVT_FLASH_OPERATION_ERROR => SocEvent::FlashOperationError,
            other => SocEvent::Other(other),
        })
    }

    fn next_ble_event(&mut self) -> Result<Option<BleEvent>, RawError> {
        let Some(buf) = self.evt.as_deref_mut() else {
            return Ok(None);
        };
        let mut len = buf.0.len() as u16;
        let code = unsafe { raw::sd_ble_evt_get(buf.0.as_mut_ptr(), &mut len) };
        if code == NRF_ERROR_NOT_FOUND {
            return Ok(None);
        }
        ret(code)?;
        // SAFETY: sd_ble_evt_get just filled the buffer.
        Ok(Some(unsafe { decode(buf) }))
    }

    fn update_conn_params(&mut self, conn: ConnHandle) -> Result<(), RawError> {
        let mut params: raw::ble_gap_conn_params_t = unsafe { mem::zeroed() };
        ret(unsafe { raw::sd_ble_gap_ppcp_get(&mut params) })?;
        ret(unsafe { raw::sd_ble_gap_conn_param_update(conn.0, &params) })
    }

    fn set_empty_sys_attr(&mut self, conn: ConnHandle) -> Result<(), RawError> {
        ret(unsafe { raw::sd_ble_gatts_sys_attr_set(conn.0, ptr::null(), 0, 0) })
    }

    fn start_advertising(&mut self, adv_handle: u8) -> Result<(), RawError> {
        ret(unsafe { raw::sd_ble_gap_adv_start(adv_handle, CONN_CFG_TAG) })
    }

    fn update_phy_auto(&mut self, conn: ConnHandle) -> Result<(), RawError> {
        let phys = raw::ble_gap_phys_t {
            tx_phys: raw::BLE_GAP_PHY_AUTO as u8,
            rx_phys: raw::BLE_GAP_PHY_AUTO as u8,
        };
        ret(unsafe { raw::sd_ble_gap_phy_update(conn.0, &phys) })
    }

    fn reply_mtu(&mut self, conn: ConnHandle, server_rx_mtu: u16) -> Result<(), RawError> {
        ret(unsafe { raw::sd_ble_gatts_exchange_mtu_reply(conn.0, server_rx_mtu) })
    }

    fn disconnect(&mut self, conn: ConnHandle, reason: u8) -> Result<(), RawError> {
        ret(unsafe { raw::sd_ble_gap_disconnect(conn.0, reason) })
    }

    fn reject_pairing(&mut self, conn: ConnHandle) -> Result<(), RawError> {
        ret(unsafe {
            raw::sd_ble_gap_sec_params_reply(
                conn.0,
                raw::BLE_GAP_SEC_STATUS_PAIRING_NOT_SUPP as u8,
                ptr::null(),
                ptr::null(),
            )
        })
    }

    fn reply_no_sec_info(&mut self, conn: ConnHandle) -> Result<(), RawError> {
        ret(unsafe { raw::sd_ble_gap_sec_info_reply(conn.0, ptr::null(), ptr::null(), ptr::null()) })
    }

    fn decline_security(&mut self, conn: ConnHandle) -> Result<(), RawError> {
        ret(unsafe { raw::sd_ble_gap_authenticate(conn.0, ptr::null()) })
    }

    fn reply_no_auth_key(&mut self, conn: ConnHandle) -> Result<(), RawError> {
        ret(unsafe {
            raw::sd_ble_gap_auth_key_reply(conn.0, raw::BLE_GAP_AUTH_KEY_TYPE_NONE as u8, ptr::null())
        })
    }

    fn update_data_length_auto(&mut self, conn: ConnHandle) -> Result<(), RawError> {
        ret(unsafe { raw::sd_ble_gap_data_length_update(conn.0, ptr::null(), ptr::null_mut()) })
    }

    fn notify(&mut self, conn: ConnHandle, value_handle: u16, data: &[u8]) -> Result<(), RawError> {
        let mut len = data.len() as u16;
        let params = raw::ble_gatts_hvx_params_t {
            handle: value_handle,
            type_: raw::BLE_GATT_HVX_NOTIFICATION as u8,
            offset: 0,
            p_len: &mut len,
            p_data: data.as_ptr(),
        };
        ret(unsafe { raw::sd_ble_gatts_hvx(conn.0, &params) })
    }
}

/// Write the bootloader's DFU magic into GPREGRET.
pub fn set_dfu_magic(magic: u32) -> Result<(), FatalFault> {
    check(RawError::check(unsafe { raw::sd_power_gpregret_clr(0, 0xFF) }))?;
    check(RawError::check(unsafe { raw::sd_power_gpregret_set(0, magic) }))
}
